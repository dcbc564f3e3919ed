//! Shared test doubles: a scripted transport and dialer for exercising the
//! pool and the SSH connector without a live SSH server.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, CryptoVec};
use tokio::io::AsyncRead;

use hostlink::config::ConnectionCfg;
use hostlink::dial::{Dial, Dialed};
use hostlink::error::{ConnectionError, Result};
use hostlink::transport::{Session, SessionStream, Transport};

/// A session that records the command it ran and replies with a scripted
/// exit status.
struct FakeSession {
    commands: Arc<std::sync::Mutex<Vec<String>>>,
    events: VecDeque<ChannelMsg>,
}

impl FakeSession {
    fn new(commands: Arc<std::sync::Mutex<Vec<String>>>, stdout: &[u8], exit_status: u32) -> Self {
        let mut events = VecDeque::new();
        if !stdout.is_empty() {
            events.push_back(ChannelMsg::Data {
                data: CryptoVec::from_slice(stdout),
            });
        }
        events.push_back(ChannelMsg::ExitStatus { exit_status });
        events.push_back(ChannelMsg::Close);
        Self { commands, events }
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn set_env(&mut self, _name: &str, _value: &str) {}

    async fn exec(&mut self, command: &str) -> std::result::Result<(), russh::Error> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(())
    }

    async fn data(
        &mut self,
        _stdin: &mut (dyn AsyncRead + Send + Unpin),
    ) -> std::result::Result<(), russh::Error> {
        Ok(())
    }

    async fn eof(&mut self) -> std::result::Result<(), russh::Error> {
        Ok(())
    }

    async fn wait(&mut self) -> Option<ChannelMsg> {
        self.events.pop_front()
    }

    async fn request_subsystem_stream(
        self: Box<Self>,
        _name: &str,
    ) -> std::result::Result<SessionStream, russh::Error> {
        // No subsystem support in the fake; SFTP paths need a live server.
        Err(russh::Error::Disconnect)
    }
}

/// A transport whose liveness and session outcomes are driven by the test.
pub struct FakeTransport {
    host: String,
    healthy: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    exit_status: Arc<AtomicU32>,
    stdout: Arc<std::sync::Mutex<Vec<u8>>>,
    commands: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl Transport for FakeTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn keepalive(&self) -> std::result::Result<(), russh::Error> {
        if self.closed.load(Ordering::SeqCst) || !self.healthy.load(Ordering::SeqCst) {
            Err(russh::Error::Disconnect)
        } else {
            Ok(())
        }
    }

    async fn open_session(&self) -> std::result::Result<Box<dyn Session>, russh::Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(russh::Error::Disconnect);
        }
        let stdout = self.stdout.lock().unwrap().clone();
        Ok(Box::new(FakeSession::new(
            Arc::clone(&self.commands),
            &stdout,
            self.exit_status.load(Ordering::SeqCst),
        )))
    }

    async fn close(&self) -> std::result::Result<(), russh::Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Handle the test keeps on each transport the dialer handed out.
#[derive(Clone)]
pub struct TransportProbe {
    healthy: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl TransportProbe {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

/// Dialer that counts dials, records every command its transports ran, and
/// can be told to fail or to produce transports that are already dead.
#[derive(Clone, Default)]
pub struct FakeDialer {
    dials: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    dial_unhealthy: Arc<AtomicBool>,
    exit_status: Arc<AtomicU32>,
    stdout: Arc<std::sync::Mutex<Vec<u8>>>,
    probes: Arc<std::sync::Mutex<Vec<TransportProbe>>>,
    commands: Arc<std::sync::Mutex<Vec<String>>>,
}

impl FakeDialer {
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn probe(&self, index: usize) -> TransportProbe {
        self.probes.lock().unwrap()[index].clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make subsequently dialed transports fail their first keepalive.
    pub fn set_dial_unhealthy(&self, unhealthy: bool) {
        self.dial_unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    /// Exit status scripted sessions report for every command.
    pub fn set_exit_status(&self, exit_status: u32) {
        self.exit_status.store(exit_status, Ordering::SeqCst);
    }

    /// Stdout bytes scripted sessions emit before exiting.
    pub fn set_stdout(&self, stdout: &[u8]) {
        *self.stdout.lock().unwrap() = stdout.to_vec();
    }

    /// Every command executed on any transport this dialer produced.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dial for FakeDialer {
    type Transport = FakeTransport;

    async fn dial(
        &self,
        cfg: &ConnectionCfg,
        _connect_timeout: Duration,
    ) -> Result<Dialed<FakeTransport>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::message(&cfg.host, "scripted dial failure").into());
        }
        self.dials.fetch_add(1, Ordering::SeqCst);
        let healthy = Arc::new(AtomicBool::new(!self.dial_unhealthy.load(Ordering::SeqCst)));
        let closed = Arc::new(AtomicBool::new(false));
        self.probes.lock().unwrap().push(TransportProbe {
            healthy: Arc::clone(&healthy),
            closed: Arc::clone(&closed),
        });
        Ok(Dialed {
            target: FakeTransport {
                host: cfg.host.clone(),
                healthy,
                closed,
                exit_status: Arc::clone(&self.exit_status),
                stdout: Arc::clone(&self.stdout),
                commands: Arc::clone(&self.commands),
            },
            bastion: None,
        })
    }
}
