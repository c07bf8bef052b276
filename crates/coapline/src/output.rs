use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use coapline_message::option::{
    decode_uint, option_name, ACCEPT, CONTENT_FORMAT, MAX_AGE, SIZE1, URI_PORT,
};
use coapline_message::{CoapOption, Message};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct OptionOutput {
    number: u16,
    name: &'static str,
    value: String,
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    remote: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    code: String,
    message_id: u16,
    token: String,
    options: Vec<OptionOutput>,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_message(msg: &Message, remote: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                remote,
                kind: msg.message_type.short_name(),
                code: msg.code.to_string(),
                message_id: msg.message_id,
                token: hex(&msg.token),
                options: msg
                    .options
                    .iter()
                    .map(|opt| OptionOutput {
                        number: opt.number,
                        name: option_name(opt.number),
                        value: option_value(opt),
                    })
                    .collect(),
                payload_size: msg.payload.len(),
                payload: payload_preview(&msg.payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "CODE", "MID", "TOKEN", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    msg.message_type.short_name().to_string(),
                    msg.code.to_string(),
                    msg.message_id.to_string(),
                    hex(&msg.token),
                    msg.payload.len().to_string(),
                    payload_preview(&msg.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let options: Vec<String> = msg
                .options
                .iter()
                .map(|opt| format!("{}={}", option_name(opt.number), option_value(opt)))
                .collect();
            println!(
                "{} {} mid={} token={} options=[{}] size={} payload={}",
                msg.message_type,
                msg.code,
                msg.message_id,
                hex(&msg.token),
                options.join(", "),
                msg.payload.len(),
                payload_preview(&msg.payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(&msg.payload);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn option_value(opt: &CoapOption) -> String {
    match opt.number {
        CONTENT_FORMAT | ACCEPT | URI_PORT | MAX_AGE | SIZE1 => decode_uint(&opt.value)
            .map(|v| v.to_string())
            .unwrap_or_else(|| hex(&opt.value)),
        _ => match std::str::from_utf8(&opt.value) {
            Ok(text) if !text.is_empty() => text.to_string(),
            _ => hex(&opt.value),
        },
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
