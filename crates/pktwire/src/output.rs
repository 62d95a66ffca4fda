use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pktwire_frame::Packet;
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
struct PacketOutput<'a> {
    kind: u16,
    encoded_size: usize,
    payload_size: usize,
    payload: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_packet(packet: &Packet, peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                kind: packet.kind(),
                encoded_size: packet.encoded_size(),
                payload_size: packet.payload().len(),
                payload: payload_preview(packet.payload()),
                peer,
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
                .set_header(vec!["TYPE", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    format!("{:#06x}", packet.kind()),
                    packet.payload().len().to_string(),
                    peer.to_string(),
                    payload_preview(packet.payload()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "type={} size={} peer={} payload={}",
                packet.kind(),
                packet.payload().len(),
                peer,
                payload_preview(packet.payload())
            );
        }
        OutputFormat::Raw => print_raw(packet.payload()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(data);
    let _ = out.flush();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_marks_binary_payloads() {
        assert_eq!(payload_preview(b"hello"), "hello");
        assert_eq!(payload_preview(&[0xFF, 0xFE, 0x00]), "<binary 3 bytes>");
    }

    #[test]
    fn json_line_has_packet_fields() {
        let packet = Packet::new(7, &b"hi"[..]);
        let out = PacketOutput {
            kind: packet.kind(),
            encoded_size: packet.encoded_size(),
            payload_size: packet.payload().len(),
            payload: payload_preview(packet.payload()),
            peer: "127.0.0.1:9",
            timestamp: "0".to_string(),
        };
        let value: serde_json::Value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["kind"], 7);
        assert_eq!(value["encoded_size"], 6);
        assert_eq!(value["payload"], "hi");
        assert_eq!(value["peer"], "127.0.0.1:9");
    }
}
