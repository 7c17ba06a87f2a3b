use super::*;
use crate::error::{names, MethodError};
use crate::wire::{self, FrameBuffer};

use serde_json::json;
use test_log::test;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

const GUID: &str = "00112233445566778899aabbccddeeff";
const UNIQUE_NAME: &str = ":1.42";

/// Just enough of a message bus to drive one connection from the far end.
struct FakeBus {
    stream: DuplexStream,
    frames: FrameBuffer,
    serial: u32,
}

impl FakeBus {
    /// Accepts the handshake and answers `Hello`.
    async fn accept(mut stream: DuplexStream) -> Result<Self> {
        let mut line = Vec::new();
        while !line.ends_with(b"\r\n") {
            line.push(stream.read_u8().await?);
        }
        assert!(line.starts_with(b"\0AUTH EXTERNAL "));
        stream
            .write_all(format!("OK {}\r\n", GUID).as_bytes())
            .await?;
        let mut begin = [0u8; 7];
        stream.read_exact(&mut begin).await?;
        assert_eq!(&begin, b"BEGIN\r\n");

        let mut bus = Self {
            stream,
            frames: FrameBuffer::new(),
            serial: 0,
        };
        let hello = bus.next_message().await?;
        assert_eq!(hello.member(), Some("Hello"));
        assert_eq!(hello.destination(), Some(BUS_NAME));
        bus.send(&Message::method_return(&hello).with_arg(UNIQUE_NAME))
            .await?;
        Ok(bus)
    }

    async fn next_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.frames.next_message()? {
                return Ok(message);
            }
            let mut chunk = [0u8; 1024];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Disconnected("client went away".to_owned()));
            }
            self.frames.push(&chunk[..n]);
        }
    }

    /// Sends `message` as if it came from the bus itself.
    async fn send(&mut self, message: &Message) -> Result<u32> {
        self.serial += 1;
        let bytes = wire::encode(message, self.serial, Some(BUS_NAME))?;
        self.stream.write_all(&bytes).await?;
        Ok(self.serial)
    }

    async fn call(&mut self, path: &str, interface: &str, member: &str, body: Vec<Value>) -> Result<u32> {
        let call = Message::method_call(Some(UNIQUE_NAME), path, Some(interface), member)?
            .with_body(body);
        self.send(&call).await
    }
}

async fn join<T>(handle: JoinHandle<T>) -> Result<T> {
    handle.await.map_err(|e| Error::Io(e.to_string()))
}

fn tree() -> Result<ObjectTree> {
    let mut tree = ObjectTree::new()?;
    tree.register_interface(&json!({
        "name": "org.example.Item",
        "methods": [
            { "name": "Double", "args": [ { "type": "i" }, { "type": "i", "direction": "out" } ] },
            { "name": "Fail" },
        ],
        "properties": [
            { "name": "Label", "type": "s" },
            { "name": "Size", "type": "u", "access": "read" },
        ],
        "signals": [ { "name": "Poked", "args": [ { "type": "s" } ] } ],
    }))?;
    let item = tree
        .implement("org.example.Item")?
        .method("Double", |_, call| match call.body.first() {
            Some(Value::Int32(n)) => Ok(Some(Value::Int32(n * 2))),
            _ => Err(MethodError::invalid_args("expected an int")),
        })
        .method("Fail", |_, _| {
            Err(MethodError::new("org.example.Error.Broken", "it broke"))
        })
        .property("Label", "first")
        .property("Size", 3u32);
    tree.add_node(Node::new("/item")?.with(item))?;
    Ok(tree)
}

async fn connected() -> Result<(Connection, FakeBus)> {
    let (client, server) = duplex(64 * 1024);
    let bus = tokio::spawn(FakeBus::accept(server));
    let connection = Connection::establish(client, 1000, tree()?).await?;
    let bus = join(bus).await??;
    Ok((connection, bus))
}

fn remote_call(member: &str) -> Result<Message> {
    Message::method_call(
        Some("org.example.Remote"),
        "/remote",
        Some("org.example.Remote"),
        member,
    )
}

#[test(tokio::test)]
async fn establishes_and_reports_unique_name() -> Result<()> {
    let (connection, _bus) = connected().await?;
    assert_eq!(connection.unique_name(), UNIQUE_NAME);
    assert_eq!(connection.server_guid(), GUID);
    // Established is handled by the driver after `establish` returns.
    connection.with_tree(|_| ()).await?;
    assert_eq!(
        connection.state(),
        ConnectionState::Connected {
            unique_name: UNIQUE_NAME.to_owned()
        }
    );
    Ok(())
}

#[test(tokio::test)]
async fn rejected_authentication_fails_establish() {
    let (client, mut server) = duplex(1024);
    tokio::spawn(async move {
        let mut line = Vec::new();
        while !line.ends_with(b"\r\n") {
            match server.read_u8().await {
                Ok(b) => line.push(b),
                Err(_) => return,
            }
        }
        let _ = server.write_all(b"REJECTED EXTERNAL\r\n").await;
    });
    let result = Connection::establish(client, 1000, ObjectTree::new().unwrap()).await;
    assert!(matches!(result, Err(Error::Auth(_))));
}

#[test(tokio::test)]
async fn replies_are_matched_by_serial() -> Result<()> {
    let (connection, mut bus) = connected().await?;

    let first = tokio::spawn({
        let connection = connection.clone();
        let call = remote_call("First")?;
        async move { connection.call(call).await }
    });
    let call_a = bus.next_message().await?;
    let second = tokio::spawn({
        let connection = connection.clone();
        let call = remote_call("Second")?;
        async move { connection.call(call).await }
    });
    let call_b = bus.next_message().await?;
    assert_eq!(call_a.member(), Some("First"));
    assert_eq!(call_b.member(), Some("Second"));
    assert!(call_a.serial < call_b.serial);

    bus.send(&Message::method_return(&call_b).with_arg("second"))
        .await?;
    bus.send(&Message::error(
        &call_a,
        &MethodError::new("org.example.Error.Nope", "no"),
    ))
    .await?;

    let reply = join(second).await??;
    assert_eq!(reply.body, vec![Value::from("second")]);
    assert_eq!(
        join(first).await?,
        Err(Error::Call(MethodError::new("org.example.Error.Nope", "no")))
    );
    Ok(())
}

#[test(tokio::test)]
async fn dispatch_errors_keep_the_connection_up() -> Result<()> {
    let (connection, mut bus) = connected().await?;

    let serial = bus.call("/nowhere", "org.example.Item", "Double", vec![Value::Int32(1)]).await?;
    let reply = bus.next_message().await?;
    assert_eq!(reply.reply_serial(), Some(serial));
    assert_eq!(reply.error_name(), Some(names::UNKNOWN_OBJECT));

    let serial = bus.call("/item", "org.example.Item", "Fail", vec![]).await?;
    let reply = bus.next_message().await?;
    assert_eq!(reply.reply_serial(), Some(serial));
    assert_eq!(reply.error_name(), Some("org.example.Error.Broken"));
    assert_eq!(reply.destination(), Some(BUS_NAME));

    let serial = bus.call("/item", "org.example.Item", "Double", vec![Value::from("x")]).await?;
    let reply = bus.next_message().await?;
    assert_eq!(reply.reply_serial(), Some(serial));
    assert_eq!(reply.error_name(), Some(names::INVALID_ARGS));

    let serial = bus.call("/item", "org.example.Item", "Double", vec![Value::Int32(21)]).await?;
    let reply = bus.next_message().await?;
    assert_eq!(reply.kind, MessageKind::MethodReturn);
    assert_eq!(reply.reply_serial(), Some(serial));
    assert_eq!(reply.body, vec![Value::Int32(42)]);

    assert!(matches!(connection.state(), ConnectionState::Connected { .. }));
    Ok(())
}

#[test(tokio::test)]
async fn teardown_fails_pending_calls() -> Result<()> {
    let (connection, mut bus) = connected().await?;
    let pending = tokio::spawn({
        let connection = connection.clone();
        let call = remote_call("Slow")?;
        async move { connection.call(call).await }
    });
    bus.next_message().await?;
    drop(bus);

    assert!(matches!(join(pending).await?, Err(Error::Disconnected(_))));
    assert!(matches!(connection.closed().await, Error::Disconnected(_)));
    assert!(matches!(
        connection.state(),
        ConnectionState::Disconnected(_)
    ));
    assert!(matches!(
        connection.call(remote_call("Late")?).await,
        Err(Error::Disconnected(_))
    ));
    Ok(())
}

#[test(tokio::test)]
async fn close_stops_the_driver() -> Result<()> {
    let (connection, _bus) = connected().await?;
    connection.close()?;
    assert_eq!(
        connection.closed().await,
        Error::Disconnected("connection closed".to_owned())
    );
    Ok(())
}

#[test(tokio::test)]
async fn properties_get_and_set_over_the_bus() -> Result<()> {
    let (_connection, mut bus) = connected().await?;
    let properties = crate::standard::PROPERTIES;

    let serial = bus
        .call(
            "/item",
            properties,
            "Set",
            vec![
                Value::from("org.example.Item"),
                Value::from("Label"),
                Value::variant("second"),
            ],
        )
        .await?;
    let changed = bus.next_message().await?;
    assert_eq!(changed.kind, MessageKind::Signal);
    assert_eq!(changed.member(), Some("PropertiesChanged"));
    assert_eq!(changed.path().map(ObjectPath::as_str), Some("/item"));
    assert_eq!(changed.body_signature(), "sa{sv}as");
    assert_eq!(changed.body[0], Value::from("org.example.Item"));
    let entries = changed.body[1]
        .as_array()
        .and_then(|a| a.get("Label"))
        .cloned();
    assert_eq!(entries, Some(Value::variant("second")));
    let reply = bus.next_message().await?;
    assert_eq!(reply.kind, MessageKind::MethodReturn);
    assert_eq!(reply.reply_serial(), Some(serial));

    // Setting the same value again changes nothing, so no signal.
    let again = bus
        .call(
            "/item",
            properties,
            "Set",
            vec![
                Value::from("org.example.Item"),
                Value::from("Label"),
                Value::variant("second"),
            ],
        )
        .await?;
    let get = bus
        .call(
            "/item",
            properties,
            "Get",
            vec![Value::from("org.example.Item"), Value::from("Label")],
        )
        .await?;
    let reply = bus.next_message().await?;
    assert_eq!(reply.reply_serial(), Some(again));
    let reply = bus.next_message().await?;
    assert_eq!(reply.reply_serial(), Some(get));
    assert_eq!(reply.body, vec![Value::variant("second")]);

    let read_only = bus
        .call(
            "/item",
            properties,
            "Set",
            vec![
                Value::from("org.example.Item"),
                Value::from("Size"),
                Value::variant(4u32),
            ],
        )
        .await?;
    let reply = bus.next_message().await?;
    assert_eq!(reply.reply_serial(), Some(read_only));
    assert_eq!(reply.error_name(), Some(names::PROPERTY_READ_ONLY));
    Ok(())
}

#[test(tokio::test)]
async fn owner_updates_notify_the_bus() -> Result<()> {
    let (connection, mut bus) = connected().await?;
    connection
        .set_property(
            ObjectPath::new("/item")?,
            "org.example.Item",
            "Size",
            Value::Uint32(9),
        )
        .await?;
    let changed = bus.next_message().await?;
    assert_eq!(changed.member(), Some("PropertiesChanged"));

    assert!(matches!(
        connection
            .set_property(
                ObjectPath::new("/item")?,
                "org.example.Item",
                "Size",
                Value::from("nine"),
            )
            .await,
        Err(Error::Call(MethodError { name, .. })) if name == names::INVALID_ARGS
    ));

    connection
        .emit_signal("/item", "org.example.Item", "Poked", vec![Value::from("hi")])
        .await?;
    let poked = bus.next_message().await?;
    assert_eq!(poked.member(), Some("Poked"));
    assert_eq!(poked.body, vec![Value::from("hi")]);
    Ok(())
}

#[test(tokio::test)]
async fn signals_reach_matching_subscribers() -> Result<()> {
    let (connection, mut bus) = connected().await?;
    let mut ticks = connection
        .subscribe(
            SignalMatch::new()
                .interface("org.example.Clock")
                .member("Tick"),
        )
        .await?;
    let add_match = bus.next_message().await?;
    assert_eq!(add_match.member(), Some("AddMatch"));
    assert!(add_match.no_reply_expected());
    assert_eq!(
        add_match.body,
        vec![Value::from(
            "type='signal',interface='org.example.Clock',member='Tick'"
        )]
    );

    let signal = |member: &str, n: u32| -> Result<Message> {
        Ok(Message::signal("/clock", "org.example.Clock", member)?.with_arg(n))
    };
    bus.send(&signal("Tock", 1)?).await?;
    bus.send(&signal("Tick", 2)?).await?;
    let tick = ticks.next().await;
    assert_eq!(tick.map(|t| t.body), Some(vec![Value::Uint32(2)]));
    Ok(())
}

#[test(tokio::test)]
async fn calls_to_ourselves_stay_local() -> Result<()> {
    let (connection, mut bus) = connected().await?;
    let call = Message::method_call(
        Some(UNIQUE_NAME),
        "/item",
        Some("org.example.Item"),
        "Double",
    )?
    .with_arg(5i32);
    let reply = connection.call(call).await?;
    assert_eq!(reply.body, vec![Value::Int32(10)]);

    let missing = Message::method_call(Some(UNIQUE_NAME), "/gone", None, "Ping")?;
    assert!(matches!(
        connection.call(missing).await,
        Err(Error::Call(MethodError { name, .. })) if name == names::UNKNOWN_OBJECT
    ));

    // Nothing above touched the socket.
    let pending = tokio::spawn({
        let connection = connection.clone();
        let call = remote_call("After")?;
        async move { connection.call(call).await }
    });
    assert_eq!(bus.next_message().await?.member(), Some("After"));
    pending.abort();
    Ok(())
}

#[test(tokio::test)]
async fn no_reply_calls_run_silently() -> Result<()> {
    let (_connection, mut bus) = connected().await?;
    let set = Message::method_call(
        Some(UNIQUE_NAME),
        "/item",
        Some(crate::standard::PROPERTIES),
        "Set",
    )?
    .with_arg("org.example.Item")
    .with_arg("Label")
    .with_arg(Value::variant("quiet"))
    .with_flags(Flags::NO_REPLY_EXPECTED);
    bus.send(&set).await?;
    let ping = bus
        .call("/item", crate::standard::PEER, "Ping", vec![])
        .await?;

    let changed = bus.next_message().await?;
    assert_eq!(changed.member(), Some("PropertiesChanged"));
    let reply = bus.next_message().await?;
    assert_eq!(reply.reply_serial(), Some(ping));
    Ok(())
}

#[test]
fn match_rules() -> Result<()> {
    let rule = SignalMatch::new()
        .sender(BUS_NAME)
        .path(ObjectPath::new("/a")?)
        .member("NameOwnerChanged");
    assert_eq!(
        rule.rule(),
        "type='signal',sender='org.freedesktop.DBus',path='/a',member='NameOwnerChanged'"
    );
    let mut signal = Message::signal("/a", BUS_INTERFACE, "NameOwnerChanged")?;
    assert!(!rule.matches(&signal));
    signal.fields.sender = Some(BUS_NAME.to_owned());
    assert!(rule.matches(&signal));
    assert!(SignalMatch::new().matches(&signal));
    assert!(!SignalMatch::new().matches(&remote_call("Ping")?));
    Ok(())
}
