//! The task behind a [`Connection`](super::Connection).

use super::{ConnectionState, SignalMatch};
use crate::dispatch::{dispatch, reply_to};
use crate::error::{Error, MethodError, Result};
use crate::message::{Message, MessageKind};
use crate::tree::ObjectTree;
use crate::value::Value;
use crate::wire::{self, FrameBuffer};

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};

const READ_CHUNK: usize = 4096;

pub(crate) type TreeFn = Box<dyn FnOnce(&mut ObjectTree) + Send>;

pub(crate) enum Command {
    Call {
        message: Message,
        reply: oneshot::Sender<Result<Message>>,
    },
    Send {
        message: Message,
        sent: oneshot::Sender<Result<u32>>,
    },
    WithTree(TreeFn),
    Subscribe {
        rule: SignalMatch,
        events: mpsc::UnboundedSender<Message>,
    },
    Established {
        unique_name: String,
    },
    Close,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Call { message, .. } => write!(f, "Call({})", message),
            Command::Send { message, .. } => write!(f, "Send({})", message),
            Command::WithTree(_) => write!(f, "WithTree"),
            Command::Subscribe { rule, .. } => write!(f, "Subscribe({})", rule.rule()),
            Command::Established { unique_name } => write!(f, "Established({})", unique_name),
            Command::Close => write!(f, "Close"),
        }
    }
}

struct PendingCall {
    /// Kept for diagnostics.
    request: Message,
    reply: oneshot::Sender<Result<Message>>,
}

type Finished = (Message, std::result::Result<Option<Value>, MethodError>);

enum Event {
    Read(std::io::Result<usize>),
    Command(Option<Command>),
    Finished(Finished),
}

pub(crate) struct Driver<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    chunk: Vec<u8>,
    frames: FrameBuffer,
    next_serial: u32,
    pending: HashMap<u32, PendingCall>,
    tree: ObjectTree,
    subscriptions: Vec<(SignalMatch, mpsc::UnboundedSender<Message>)>,
    in_flight: FuturesUnordered<BoxFuture<'static, Finished>>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    unique_name: Option<String>,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub(crate) fn new(
        stream: S,
        tree: ObjectTree,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            chunk: vec![0; READ_CHUNK],
            frames: FrameBuffer::new(),
            next_serial: 1,
            pending: HashMap::new(),
            tree,
            subscriptions: Vec::new(),
            in_flight: FuturesUnordered::new(),
            commands,
            state,
            unique_name: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let cause = loop {
            match self.step().await {
                Ok(true) => (),
                Ok(false) => break Error::Disconnected("connection closed".to_owned()),
                Err(e) => break e,
            }
        };
        self.teardown(cause).await;
    }

    /// Handles one event. `Ok(false)` means an orderly shutdown.
    async fn step(&mut self) -> Result<bool> {
        let event = tokio::select! {
            read = self.reader.read(&mut self.chunk) => Event::Read(read),
            command = self.commands.recv() => Event::Command(command),
            Some(finished) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                Event::Finished(finished)
            }
        };
        match event {
            Event::Read(read) => {
                let n = read?;
                if n == 0 {
                    return Err(Error::Disconnected("connection closed by peer".to_owned()));
                }
                trace!("read {} bytes", n);
                self.frames.push(&self.chunk[..n]);
                while let Some(message) = self.frames.next_message()? {
                    self.incoming(message).await?;
                }
            }
            Event::Command(None) | Event::Command(Some(Command::Close)) => return Ok(false),
            Event::Command(Some(command)) => self.command(command).await?,
            Event::Finished((call, result)) => self.finish(call, result).await?,
        }
        self.flush_signals().await?;
        Ok(true)
    }

    fn allocate_serial(&mut self) -> u32 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1).max(1);
        serial
    }

    fn is_local(&self, message: &Message) -> bool {
        self.unique_name.is_some() && message.destination() == self.unique_name.as_deref()
    }

    /// Encoding failures are the sender's problem; only write failures are
    /// fatal, and they come back through the outer `Result`.
    async fn write(&mut self, message: &Message) -> Result<Result<u32>> {
        let serial = self.allocate_serial();
        let bytes = match wire::encode(message, serial, None) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("not sending {}: {}", message, e);
                return Ok(Err(e));
            }
        };
        debug!("sending #{} {}", serial, message);
        self.writer.write_all(&bytes).await?;
        Ok(Ok(serial))
    }

    async fn command(&mut self, command: Command) -> Result<()> {
        trace!("command {:?}", command);
        match command {
            Command::Call { message, reply } if self.is_local(&message) => {
                self.call_local(message, reply)
            }
            Command::Call { mut message, reply } => match self.write(&message).await? {
                Ok(serial) => {
                    message.serial = serial;
                    self.pending.insert(
                        serial,
                        PendingCall {
                            request: message,
                            reply,
                        },
                    );
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Send { mut message, sent } if self.is_local(&message) => {
                message.serial = self.allocate_serial();
                let serial = message.serial;
                if message.kind == MessageKind::MethodCall {
                    message.fields.sender = self.unique_name.clone();
                    self.incoming(message).await?;
                } else {
                    debug!("dropping {} sent to ourselves", message);
                }
                let _ = sent.send(Ok(serial));
            }
            Command::Send { message, sent } => {
                let result = self.write(&message).await?;
                let _ = sent.send(result);
            }
            Command::WithTree(f) => f(&mut self.tree),
            Command::Subscribe { rule, events } => {
                debug!("subscribing to {}", rule.rule());
                self.subscriptions.push((rule, events));
            }
            Command::Established { unique_name } => {
                info!("connected as {}", unique_name);
                self.state.send_replace(ConnectionState::Connected {
                    unique_name: unique_name.clone(),
                });
                self.unique_name = Some(unique_name);
            }
            Command::Close => (),
        }
        Ok(())
    }

    /// Dispatches a call we addressed to ourselves without touching the
    /// socket.
    fn call_local(&mut self, mut message: Message, reply: oneshot::Sender<Result<Message>>) {
        message.serial = self.allocate_serial();
        message.fields.sender = self.unique_name.clone();
        debug!("calling locally #{} {}", message.serial, message);
        match dispatch(&mut self.tree, &message) {
            Ok(pending) => {
                let serial = message.serial;
                let call = message.clone();
                self.in_flight
                    .push(async move { (call, pending.await) }.boxed());
                self.pending.insert(
                    serial,
                    PendingCall {
                        request: message,
                        reply,
                    },
                );
            }
            Err(e) => {
                let _ = reply.send(Err(Error::Call(e)));
            }
        }
    }

    async fn incoming(&mut self, message: Message) -> Result<()> {
        debug!("received #{} {}", message.serial, message);
        match message.kind {
            MessageKind::MethodCall => match dispatch(&mut self.tree, &message) {
                Ok(pending) => {
                    self.in_flight
                        .push(async move { (message, pending.await) }.boxed());
                }
                Err(e) => self.finish(message, Err(e)).await?,
            },
            MessageKind::MethodReturn | MessageKind::Error => self.resolve(message),
            MessageKind::Signal => self.deliver(message),
        }
        Ok(())
    }

    async fn finish(
        &mut self,
        call: Message,
        result: std::result::Result<Option<Value>, MethodError>,
    ) -> Result<()> {
        let Some(mut reply) = reply_to(&call, result) else {
            return Ok(());
        };
        if self.is_local(&reply) {
            reply.serial = self.allocate_serial();
            self.resolve(reply);
        } else if let Err(e) = self.write(&reply).await? {
            error!("could not reply to {}: {}", call, e);
        }
        Ok(())
    }

    fn resolve(&mut self, reply: Message) {
        let pending = reply
            .reply_serial()
            .and_then(|serial| self.pending.remove(&serial));
        let Some(pending) = pending else {
            warn!("dropping unexpected reply {}", reply);
            return;
        };
        trace!("{} answers {}", reply, pending.request);
        let result = match reply.kind {
            MessageKind::Error => Err(Error::Call(reply.to_method_error())),
            _ => Ok(reply),
        };
        if pending.reply.send(result).is_err() {
            debug!("caller of {} went away", pending.request);
        }
    }

    fn deliver(&mut self, signal: Message) {
        let mut delivered = false;
        self.subscriptions.retain(|(rule, events)| {
            if !rule.matches(&signal) {
                return !events.is_closed();
            }
            delivered = true;
            events.send(signal.clone()).is_ok()
        });
        if !delivered {
            debug!("no subscriber for {}", signal);
        }
    }

    async fn flush_signals(&mut self) -> Result<()> {
        for signal in self.tree.take_signals() {
            if let Err(e) = self.write(&signal).await? {
                warn!("dropped signal {}: {}", signal, e);
            }
        }
        Ok(())
    }

    async fn teardown(mut self, cause: Error) {
        match &cause {
            Error::Disconnected(reason) => info!("disconnecting: {}", reason),
            other => error!("connection failed: {}", other),
        }
        let reason = match &cause {
            Error::Disconnected(reason) => reason.clone(),
            other => other.to_string(),
        };
        for (serial, pending) in self.pending.drain() {
            debug!("failing pending call #{} {}", serial, pending.request);
            let _ = pending.reply.send(Err(Error::Disconnected(reason.clone())));
        }
        self.state
            .send_replace(ConnectionState::Disconnected(cause));
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            trace!("discarding {:?}", command);
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!("shutdown: {}", e);
        }
    }
}
