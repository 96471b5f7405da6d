//! `droidpilot parse` — run a saved model reply through the parser and decoder.

use std::io::Read;
use std::path::PathBuf;

use droidpilot_agent::StreamParser;
use droidpilot_core::action::{ActionDecoder, CommandDecoder};

/// Fragment size used to replay the reply as if it were streamed.
const REPLAY_CHUNK_CHARS: usize = 16;

pub fn run(file: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let report = analyze(&raw);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn analyze(raw: &str) -> serde_json::Value {
    let mut parser = StreamParser::new();
    let mut preview = String::new();

    let chars: Vec<char> = raw.chars().collect();
    for piece in chars.chunks(REPLAY_CHUNK_CHARS) {
        let fragment: String = piece.iter().collect();
        if let Some(delta) = parser.push(&fragment).delta {
            preview.push_str(&delta);
        }
    }
    if let Some(rest) = parser.flush() {
        preview.push_str(&rest);
    }

    let response = parser.finish();
    let decoded = match CommandDecoder.decode(&response.action) {
        Ok(action) => serde_json::json!({ "ok": action }),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };

    serde_json::json!({
        "thinking": response.thinking,
        "action_text": response.action,
        "preview": preview.trim_end(),
        "decoded": decoded,
    })
}
