use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use pktwire_frame::{PacketConfig, PacketReader, PacketWriter};
use pktwire_transport::{default_sink, Endpoint};
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs, Target};
use crate::exit::{frame_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    if args.repeat == 0 {
        return Err(CliError::new(USAGE, "--repeat must be at least 1"));
    }
    let target = Target::parse(&args.addr, args.udp)?;
    let payload = resolve_payload(&args)?;

    let endpoint = connect(&target, wait_timeout)?;
    let sink = default_sink();
    let mut writer =
        PacketWriter::with_config(endpoint.clone(), PacketConfig::default(), sink.clone())
            .map_err(|err| frame_error("configure sender failed", err))?;

    for _ in 0..args.repeat {
        writer
            .send(args.kind, payload.clone())
            .map_err(|err| frame_error("send failed", err))?;
    }
    debug!(
        endpoint = endpoint.label(),
        kind = args.kind,
        count = args.repeat,
        "sent packets"
    );

    if args.wait {
        let config = PacketConfig {
            read_timeout: Some(wait_timeout),
            ..PacketConfig::default()
        };
        let mut reader = PacketReader::with_config(endpoint, config, sink)
            .map_err(|err| frame_error("configure receiver failed", err))?;
        let packet = reader
            .read_packet()
            .map_err(|err| frame_error("receive failed", err))?;
        print_packet(&packet, reader.endpoint().label(), format);
    }

    Ok(SUCCESS)
}

fn connect(target: &Target, timeout: Duration) -> CliResult<Endpoint> {
    match target {
        Target::Tcp(addr) => Endpoint::connect_tcp_timeout(*addr, timeout)
            .map_err(|err| transport_error("connect failed", err)),
        Target::Unix(path) => {
            Endpoint::connect_unix(path).map_err(|err| transport_error("connect failed", err))
        }
        Target::Udp(addr) => {
            let local = match addr {
                SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
                SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
            };
            let endpoint =
                Endpoint::bind_udp(local).map_err(|err| transport_error("bind failed", err))?;
            endpoint
                .connect_udp(*addr)
                .map_err(|err| transport_error("connect failed", err))?;
            Ok(endpoint)
        }
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Bytes::copy_from_slice(json.as_bytes()));
    }
    if let Some(data) = &args.data {
        return Ok(Bytes::copy_from_slice(data.as_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path).map(Bytes::from).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Bytes::new())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args() -> SendArgs {
        SendArgs {
            addr: "127.0.0.1:1".to_string(),
            udp: false,
            kind: 1,
            json: None,
            data: None,
            file: None,
            repeat: 1,
            wait: false,
            wait_timeout: "5s".to_string(),
        }
    }

    #[test]
    fn payload_from_data_and_json() {
        let mut with_data = args();
        with_data.data = Some("hello".to_string());
        assert_eq!(resolve_payload(&with_data).unwrap().as_ref(), b"hello");

        let mut with_json = args();
        with_json.json = Some("{\"x\":1}".to_string());
        assert_eq!(resolve_payload(&with_json).unwrap().as_ref(), b"{\"x\":1}");

        assert!(resolve_payload(&args()).unwrap().is_empty());
    }

    #[test]
    fn invalid_json_is_usage_error() {
        let mut bad = args();
        bad.json = Some("{not json".to_string());
        assert_eq!(resolve_payload(&bad).unwrap_err().code, USAGE);
    }

    #[test]
    fn missing_file_is_reported() {
        let mut missing = args();
        missing.file = Some(PathBuf::from("/nonexistent/pktwire/payload.bin"));
        let err = resolve_payload(&missing).unwrap_err();
        assert!(err.message.contains("failed reading"));
    }

    #[test]
    fn udp_connect_uses_matching_family() {
        let receiver = Endpoint::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let target = Target::Udp(receiver.local_addr().unwrap());
        let endpoint = connect(&target, Duration::from_secs(1)).unwrap();
        assert!(endpoint.local_addr().unwrap().is_ipv4());
    }
}
