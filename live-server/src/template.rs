// live-server/src/template.rs
use crate::utils::html::escape;

/// Raw bytes per upload fragment; base64 and the JSON envelope must still fit
/// in one websocket frame.
pub const UPLOAD_CHUNK_BYTES: usize = 32 * 1024;

/// Inputs for the single page every viewer loads
#[derive(Debug, Clone)]
pub struct PageOptions<'a> {
    pub title: &'a str,
    pub extra_head: &'a str,
    pub ws_route: &'a str,
    pub handshake_token: &'a str,
    pub reset_on_disconnect: bool,
}

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<script type="module">
import * as Turbo from "https://cdn.skypack.dev/pin/@hotwired/turbo@v7.1.0-RBjb2wnkmosSQVoP27jT/min/@hotwired/turbo.js";
const socket = new WebSocket(`ws${location.protocol.substring(4)}//${location.host}__WS_ROUTE__`);
socket.addEventListener("open", function () { socket.send("__HANDSHAKE__"); });
__ON_CLOSE__
Turbo.connectStreamSource(socket);
window.web_sock = socket;
</script>
<script>
const CHUNK_BYTES = __CHUNK_BYTES__;
function encode_chunk(blob) {
    return new Promise(function (resolve, reject) {
        const reader = new FileReader();
        reader.onload = function () { resolve(String(reader.result).split(",", 2)[1] || ""); };
        reader.onerror = reject;
        reader.readAsDataURL(blob);
    });
}
async function send_file(id, file) {
    const parts = Math.max(1, Math.ceil(file.size / CHUNK_BYTES));
    for (let index = 0; index < parts; index++) {
        const data = await encode_chunk(file.slice(index * CHUNK_BYTES, (index + 1) * CHUNK_BYTES));
        web_sock.send(JSON.stringify({ISFILE: true, FILEID: id, CURRENT: index, DATA: data}));
    }
}
function submit_ws(form) {
    const fields = {};
    const manifest = {};
    const pending = [];
    for (const [name, value] of new FormData(form)) {
        if (value instanceof File) {
            if (!value.name) { continue; }
            const id = crypto.randomUUID();
            const parts = Math.max(1, Math.ceil(value.size / CHUNK_BYTES));
            (manifest[name] = manifest[name] || []).push({FILEID: id, NAME: value.name, SIZE: value.size, MIME: value.type, MAXPART: parts - 1});
            pending.push([id, value]);
        } else {
            fields[name] = value;
        }
    }
    if (pending.length > 0) { fields.FILES = manifest; }
    web_sock.send(JSON.stringify(fields));
    pending.forEach(function (entry) { send_file(entry[0], entry[1]); });
    return false;
}
</script>
__EXTRA_HEAD__
<title>__TITLE__</title>
</head>
<body><div id="mainDiv"></div></body>
</html>
"#;

const ON_CLOSE_RESET: &str = r#"socket.addEventListener("close", function () { document.getElementById("mainDiv").innerHTML = "DISCONNECTED, REFRESH TO CONTINUE"; });"#;

pub fn render_page(options: &PageOptions<'_>) -> String {
    let on_close = if options.reset_on_disconnect { ON_CLOSE_RESET } else { "" };
    PAGE.replace("__WS_ROUTE__", options.ws_route)
        .replace("__HANDSHAKE__", options.handshake_token)
        .replace("__ON_CLOSE__", on_close)
        .replace("__CHUNK_BYTES__", &UPLOAD_CHUNK_BYTES.to_string())
        .replace("__EXTRA_HEAD__", options.extra_head)
        .replace("__TITLE__", &escape(options.title))
}
