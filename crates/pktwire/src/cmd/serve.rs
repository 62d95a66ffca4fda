use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pktwire_frame::{
    receive_once, receive_once_from, send_packet, send_packet_to, FrameError, Packet, PacketBuffer,
    PacketConfig,
};
use pktwire_select::{PollOutcome, ReadySets, SelectError, Selector, SelectorConfig};
use pktwire_transport::{default_sink, Endpoint, SharedSink, TransportError};
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, ServeArgs, Target};
use crate::exit::{frame_error, select_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let poll_timeout = parse_duration(&args.poll_timeout)?;
    let config = PacketConfig {
        max_packet_size: args.max_packet_size,
        buffer_capacity: args.buffer_size,
        ..PacketConfig::default()
    };
    config
        .validate()
        .map_err(|err| frame_error("invalid buffer settings", err))?;

    let target = Target::parse(&args.addr, args.udp)?;
    let listener = bind(&target)?;
    listener
        .set_nonblocking(true)
        .map_err(|err| transport_error("configure listener failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let sink = default_sink();
    let mut server = Server {
        selector: Selector::with_config(
            SelectorConfig {
                timeout: poll_timeout,
            },
            sink.clone(),
        ),
        buffers: HashMap::new(),
        listener,
        config,
        sink,
        echo: args.echo,
        format,
        remaining: args.count,
    };
    server.start()?;

    let mut sets = ReadySets::readable_only();
    while running.load(Ordering::SeqCst) {
        match server.selector.poll(&mut sets) {
            Ok(PollOutcome::Ready(_)) => {}
            Ok(PollOutcome::TimedOut) => continue,
            Err(SelectError::Poll(err)) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(select_error("poll failed", err)),
        }

        for endpoint in sets.readable().to_vec() {
            if server.handle(&endpoint) == Flow::Done {
                return Ok(SUCCESS);
            }
        }
    }

    info!("shutting down");
    Ok(SUCCESS)
}

fn bind(target: &Target) -> CliResult<Endpoint> {
    let endpoint = match target {
        Target::Tcp(addr) => Endpoint::listen_tcp(*addr),
        Target::Udp(addr) => Endpoint::bind_udp(*addr),
        Target::Unix(path) => Endpoint::listen_unix(path),
    };
    endpoint.map_err(|err| transport_error("bind failed", err))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

/// Selector loop state: the listening endpoint plus one reassembly buffer per
/// connected client (or one for the UDP socket).
struct Server {
    selector: Selector,
    buffers: HashMap<RawFd, PacketBuffer>,
    listener: Endpoint,
    config: PacketConfig,
    sink: SharedSink,
    echo: bool,
    format: OutputFormat,
    remaining: Option<usize>,
}

impl Server {
    fn start(&mut self) -> CliResult<()> {
        self.selector
            .add(&self.listener)
            .map_err(|err| select_error("track listener failed", err))?;
        if !self.listener.kind().is_listener() {
            self.buffers.insert(
                self.listener.descriptor(),
                PacketBuffer::with_config(&self.config, self.sink.clone()),
            );
        }
        Ok(())
    }

    fn handle(&mut self, endpoint: &Endpoint) -> Flow {
        if *endpoint != self.listener {
            return self.handle_client(endpoint);
        }
        if self.listener.kind().is_listener() {
            self.accept();
            Flow::Continue
        } else {
            self.handle_datagram()
        }
    }

    fn accept(&mut self) {
        let client = match self.listener.accept() {
            Ok(client) => client,
            Err(TransportError::Accept(err)) if err.kind() == ErrorKind::WouldBlock => return,
            Err(err) => {
                warn!(error = %err, "accept failed");
                return;
            }
        };
        if let Err(err) = self.selector.add(&client) {
            warn!(client = client.label(), error = %err, "refusing client");
            return;
        }
        info!(client = client.label(), "client connected");
        self.buffers.insert(
            client.descriptor(),
            PacketBuffer::with_config(&self.config, self.sink.clone()),
        );
    }

    fn handle_client(&mut self, client: &Endpoint) -> Flow {
        let Some(buffer) = self.buffers.get_mut(&client.descriptor()) else {
            self.selector.remove(client);
            return Flow::Continue;
        };

        let mut keep = true;
        match receive_once(client, buffer, &*self.sink) {
            Ok(_) => {}
            Err(err) if err.is_would_block() => return Flow::Continue,
            Err(FrameError::ConnectionClosed) => {
                if buffer.filled_len() > 0 {
                    debug!(
                        client = client.label(),
                        discarded = buffer.filled_len(),
                        "partial packet discarded"
                    );
                }
                self.disconnect(client);
                return Flow::Continue;
            }
            Err(err) => {
                // Packets completed before the failure are still delivered.
                warn!(
                    client = client.label(),
                    queued = buffer.completed_len(),
                    error = %err,
                    "dropping client"
                );
                keep = false;
            }
        }

        let packets: Vec<Packet> = buffer.drain().collect();
        let mut flow = Flow::Continue;
        for packet in packets {
            print_packet(&packet, client.label(), self.format);
            if keep && self.echo {
                if let Err(err) = send_packet(client, &packet, &*self.sink) {
                    debug!(client = client.label(), error = %err, "echo failed");
                    keep = false;
                }
            }
            if self.count_one() == Flow::Done {
                flow = Flow::Done;
                break;
            }
        }
        if !keep {
            self.disconnect(client);
        }
        flow
    }

    fn handle_datagram(&mut self) -> Flow {
        let Some(buffer) = self.buffers.get_mut(&self.listener.descriptor()) else {
            return Flow::Continue;
        };
        if buffer.is_poisoned() {
            buffer.reset();
        }

        // A datagram that is malformed or ends mid-packet is dropped whole.
        let from = match receive_once_from(&self.listener, buffer, &*self.sink) {
            Ok((_, from)) if buffer.filled_len() == 0 => from,
            Ok((_, from)) => {
                warn!(%from, discarded = buffer.filled_len(), "datagram ended mid-packet");
                buffer.reset();
                return Flow::Continue;
            }
            Err(err) if err.is_would_block() => return Flow::Continue,
            Err(err) => {
                warn!(error = %err, "discarding datagram");
                buffer.reset();
                return Flow::Continue;
            }
        };

        let packets: Vec<Packet> = buffer.drain().collect();
        let peer = from.to_string();
        for packet in packets {
            print_packet(&packet, &peer, self.format);
            if self.echo {
                if let Err(err) = send_packet_to(&self.listener, &packet, from, &*self.sink) {
                    debug!(%from, error = %err, "echo failed");
                }
            }
            if self.count_one() == Flow::Done {
                return Flow::Done;
            }
        }
        Flow::Continue
    }

    fn disconnect(&mut self, client: &Endpoint) {
        self.selector.remove(client);
        self.buffers.remove(&client.descriptor());
        info!(client = client.label(), "client disconnected");
    }

    fn count_one(&mut self) -> Flow {
        match self.remaining.as_mut() {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    Flow::Done
                } else {
                    Flow::Continue
                }
            }
            None => Flow::Continue,
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
