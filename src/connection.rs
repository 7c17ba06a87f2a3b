//! A client connection to a message bus.
//!
//! [`Connection::establish`] authenticates, spawns a driver task that owns the
//! socket and the [`ObjectTree`], and then says `Hello` to the bus. Every
//! [`Connection`] handle afterwards talks to that task through a command
//! channel, so handles are cheap to clone and can be moved between tasks.
//!
//! Outbound calls resolve through a oneshot channel once the matching reply
//! arrives. A call addressed to our own unique name never leaves the process:
//! it is dispatched into the local tree and answered directly.
//!
//! The driver stops on the first transport error, on a malformed frame, on
//! [`Connection::close`], or when every handle is dropped. Outstanding calls
//! then fail with [`Error::Disconnected`] and [`Connection::state`] reports
//! why.

mod driver;
#[cfg(test)]
mod tests;

use crate::auth;
use crate::config::{BusAddress, ConnectionConfig};
use crate::error::{Error, Result};
use crate::message::{Flags, Message, MessageKind};
use crate::path::ObjectPath;
use crate::tree::{Node, ObjectTree};
use crate::value::Value;

use driver::{Command, Driver};
use log::info;
use std::fmt::Write as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, watch};

pub const BUS_NAME: &str = "org.freedesktop.DBus";
pub const BUS_PATH: &str = "/org/freedesktop/DBus";
pub const BUS_INTERFACE: &str = "org.freedesktop.DBus";

#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    Authenticating,
    /// Authenticated; waiting for the reply to `Hello`.
    Establishing,
    Connected { unique_name: String },
    Disconnected(Error),
}

/// Selects signals by any combination of sender, path, interface and member.
/// Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalMatch {
    sender: Option<String>,
    path: Option<ObjectPath>,
    interface: Option<String>,
    member: Option<String>,
}

impl SignalMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_owned());
        self
    }

    pub fn path(mut self, path: ObjectPath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_owned());
        self
    }

    pub fn member(mut self, member: &str) -> Self {
        self.member = Some(member.to_owned());
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        fn field(want: &Option<String>, have: Option<&str>) -> bool {
            want.as_deref().map_or(true, |want| have == Some(want))
        }
        message.kind == MessageKind::Signal
            && field(&self.sender, message.sender())
            && self.path.as_ref().map_or(true, |p| message.path() == Some(p))
            && field(&self.interface, message.interface())
            && field(&self.member, message.member())
    }

    /// The rule as the bus' `AddMatch` expects it.
    pub fn rule(&self) -> String {
        let mut rule = String::from("type='signal'");
        let fields = [
            ("sender", self.sender.as_deref()),
            ("path", self.path.as_ref().map(ObjectPath::as_str)),
            ("interface", self.interface.as_deref()),
            ("member", self.member.as_deref()),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                let _ = write!(rule, ",{}='{}'", key, value);
            }
        }
        rule
    }
}

/// Signals delivered for one [`SignalMatch`].
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    /// The next matching signal, or `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<Message> {
        self.events.recv().await
    }
}

#[derive(Clone, Debug)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    unique_name: String,
    server_guid: String,
}

impl Connection {
    /// Connects to the bus named by `config` over a Unix socket.
    pub async fn connect(config: &ConnectionConfig, tree: ObjectTree) -> Result<Self> {
        let stream = match &config.address {
            BusAddress::UnixPath(path) => UnixStream::connect(path).await?,
        };
        info!("connected to {}", config.address);
        Self::establish(stream, config.uid, tree).await
    }

    /// Runs the whole startup sequence on an already open stream. Must be
    /// called from within a tokio runtime.
    pub async fn establish<S>(mut stream: S, uid: u32, tree: ObjectTree) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (state_tx, state) = watch::channel(ConnectionState::Authenticating);
        let server_guid = auth::authenticate(&mut stream, uid).await?;
        state_tx.send_replace(ConnectionState::Establishing);

        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Driver::new(stream, tree, receiver, state_tx).run());

        let mut connection = Self {
            commands,
            state,
            unique_name: String::new(),
            server_guid,
        };
        let hello = Message::method_call(Some(BUS_NAME), BUS_PATH, Some(BUS_INTERFACE), "Hello")?;
        let reply = connection.call(hello).await?;
        let unique_name = reply
            .body
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Deserializing("Hello reply carries no unique name".to_owned()))?
            .to_owned();
        connection.command(Command::Established {
            unique_name: unique_name.clone(),
        })?;
        info!("connection established as {}", unique_name);
        connection.unique_name = unique_name;
        Ok(connection)
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    pub fn server_guid(&self) -> &str {
        &self.server_guid
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Waits until the driver stops and returns the reason.
    pub async fn closed(&self) -> Error {
        let mut state = self.state.clone();
        loop {
            if let ConnectionState::Disconnected(cause) = &*state.borrow() {
                return cause.clone();
            }
            if state.changed().await.is_err() {
                return self.disconnected();
            }
        }
    }

    fn disconnected(&self) -> Error {
        match &*self.state.borrow() {
            ConnectionState::Disconnected(Error::Disconnected(reason)) => {
                Error::Disconnected(reason.clone())
            }
            ConnectionState::Disconnected(cause) => Error::Disconnected(cause.to_string()),
            _ => Error::Disconnected("connection driver stopped".to_owned()),
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| self.disconnected())
    }

    /// Sends a method call and waits for its reply. An ERROR reply becomes
    /// [`Error::Call`].
    pub async fn call(&self, mut message: Message) -> Result<Message> {
        if message.kind != MessageKind::MethodCall {
            return Err(Error::NotAMethodCall(message.kind.name()));
        }
        message.flags.remove(Flags::NO_REPLY_EXPECTED);
        let (reply, receiver) = oneshot::channel();
        self.command(Command::Call { message, reply })?;
        receiver.await.map_err(|_| self.disconnected())?
    }

    /// Sends without waiting for a reply and returns the serial used. Method
    /// calls sent this way are flagged so that no reply is produced.
    pub async fn send(&self, mut message: Message) -> Result<u32> {
        if message.kind == MessageKind::MethodCall {
            message.flags.insert(Flags::NO_REPLY_EXPECTED);
        }
        let (sent, receiver) = oneshot::channel();
        self.command(Command::Send { message, sent })?;
        receiver.await.map_err(|_| self.disconnected())?
    }

    pub async fn emit_signal(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<Value>,
    ) -> Result<u32> {
        self.send(Message::signal(path, interface, member)?.with_body(args))
            .await
    }

    /// Runs `f` on the driver's tree. Signals `f` queues are sent right after
    /// it returns.
    pub async fn with_tree<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut ObjectTree) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result, receiver) = oneshot::channel();
        self.command(Command::WithTree(Box::new(move |tree| {
            let _ = result.send(f(tree));
        })))?;
        receiver.await.map_err(|_| self.disconnected())
    }

    pub async fn add_node(&self, node: Node) -> Result<()> {
        self.with_tree(move |tree| tree.add_node(node)).await?
    }

    pub async fn remove_node(&self, path: ObjectPath) -> Result<Node> {
        self.with_tree(move |tree| tree.remove_node(&path)).await?
    }

    /// Updates a property and notifies the bus with `PropertiesChanged` when
    /// the value actually changed.
    pub async fn set_property(
        &self,
        path: ObjectPath,
        interface: &str,
        name: &str,
        value: Value,
    ) -> Result<()> {
        let interface = interface.to_owned();
        let name = name.to_owned();
        self.with_tree(move |tree| tree.set_property(&path, &interface, &name, value))
            .await?
            .map_err(Error::Call)
    }

    /// Delivers signals matching `rule` and asks the bus to route them to us.
    pub async fn subscribe(&self, rule: SignalMatch) -> Result<Subscription> {
        let (events, receiver) = mpsc::unbounded_channel();
        let add_match = Message::method_call(
            Some(BUS_NAME),
            BUS_PATH,
            Some(BUS_INTERFACE),
            "AddMatch",
        )?
        .with_arg(rule.rule());
        self.command(Command::Subscribe { rule, events })?;
        self.send(add_match).await?;
        Ok(Subscription { events: receiver })
    }

    /// Stops the driver. Outstanding calls fail.
    pub fn close(&self) -> Result<()> {
        self.command(Command::Close)
    }
}
