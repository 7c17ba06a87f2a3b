//! Routing of incoming method calls to implementations.

use crate::error::{names, MethodError};
use crate::implementation::MethodFuture;
use crate::message::Message;
use crate::path::ObjectPath;
use crate::tree::ObjectTree;
use crate::value::Value;

use futures_util::FutureExt;
use log::{debug, warn};

/// What a handler sees of the world while it runs: the tree it lives in and
/// where in it the call landed.
pub struct CallContext<'a> {
    tree: &'a mut ObjectTree,
    path: ObjectPath,
    interface: String,
    sender: Option<String>,
}

impl<'a> CallContext<'a> {
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn tree(&self) -> &ObjectTree {
        self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ObjectTree {
        self.tree
    }

    /// Queues a signal of the called interface from the called object. The
    /// signal must be declared and `args` must match its signature.
    pub fn emit_signal(&mut self, member: &str, args: Vec<Value>) -> Result<(), MethodError> {
        let declared = self
            .tree
            .interface(&self.interface)
            .and_then(|iface| iface.signal(member).map(|s| s.signature()))
            .ok_or_else(|| {
                MethodError::failed(format!(
                    "Interface '{}' has no signal '{}'",
                    self.interface, member
                ))
            })?;
        let signal = Message::signal(self.path.as_str(), &self.interface, member)?.with_body(args);
        let found = signal.body_signature();
        if found != declared {
            return Err(MethodError::failed(format!(
                "Signal '{}' has signature '{}', not '{}'",
                member, declared, found
            )));
        }
        self.tree.queue_signal(signal);
        Ok(())
    }
}

/// Finds the handler for `call` and starts it. Lookup failures come back
/// immediately; the handler's own outcome is in the returned future.
pub fn dispatch(tree: &mut ObjectTree, call: &Message) -> Result<MethodFuture, MethodError> {
    let path = call
        .path()
        .ok_or_else(|| MethodError::invalid_args("Method call has no object path"))?;
    let member = call
        .member()
        .ok_or_else(|| MethodError::invalid_args("Method call has no member"))?;

    let (handler, interface, out_type) = {
        let node = tree
            .node(path)
            .ok_or_else(|| MethodError::unknown_object(path.as_str()))?;
        let implementation = match call.interface() {
            Some(name) => node
                .implementation(name)
                .ok_or_else(|| MethodError::unknown_interface(name))?,
            None => node
                .implementations()
                .iter()
                .find(|i| i.interface().method(member).is_some())
                .ok_or_else(|| MethodError::unknown_method("(any)", member))?,
        };
        let iface = implementation.interface();
        let method = iface
            .method(member)
            .ok_or_else(|| MethodError::unknown_method(&iface.name, member))?;
        let handler = implementation.handler(member).cloned().ok_or_else(|| {
            MethodError::new(
                names::NOT_SUPPORTED,
                format!("Method '{}' of '{}' is not implemented", member, iface.name),
            )
        })?;
        let expected = method.in_signature();
        let found = call.body_signature();
        if expected != found {
            return Err(MethodError::invalid_args(format!(
                "Invalid arguments for '{}': expected '{}', got '{}'",
                member, expected, found
            )));
        }
        (
            handler,
            iface.name.clone(),
            method.out_arg().map(|arg| arg.ty.clone()),
        )
    };

    debug!("dispatching {}", call);
    let mut ctx = CallContext {
        tree,
        path: path.clone(),
        interface,
        sender: call.sender().map(str::to_owned),
    };
    let pending = handler(&mut ctx, call);
    let member = member.to_owned();
    Ok(async move {
        let value = match pending.await {
            Ok(value) => value,
            Err(error) => return Err(error),
        };
        match (out_type, value) {
            (None, None) => Ok(None),
            (None, Some(value)) => {
                warn!(
                    "'{}' declares no output but returned '{}'; dropping it",
                    member,
                    value.signature()
                );
                Ok(None)
            }
            (Some(ty), None) => Err(MethodError::failed(format!(
                "'{}' returned nothing, expected '{}'",
                member, ty
            ))),
            (Some(ty), Some(value)) if value.value_type() != ty => {
                Err(MethodError::failed(format!(
                    "'{}' returned '{}', expected '{}'",
                    member,
                    value.signature(),
                    ty
                )))
            }
            (Some(_), value) => Ok(value),
        }
    }
    .boxed())
}

/// The message that answers `call`, unless the caller asked for none.
pub fn reply_to(call: &Message, result: Result<Option<Value>, MethodError>) -> Option<Message> {
    if call.no_reply_expected() {
        debug!("not replying to {}: no reply expected", call);
        return None;
    }
    let reply = match result {
        Ok(value) => Message::method_return(call).with_body(value.into_iter().collect()),
        Err(error) => {
            debug!("{} failed: {}", call, error);
            Message::error(call, &error)
        }
    };
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::message::{Flags, MessageKind};
    use crate::tree::Node;
    use serde_json::json;
    use test_log::test;

    fn tree() -> Result<ObjectTree> {
        let mut tree = ObjectTree::new()?;
        tree.register_interface(&json!({
            "name": "org.example.Calc",
            "methods": [
                { "name": "Double", "args": [ { "type": "i" }, { "type": "i", "direction": "out" } ] },
                { "name": "Fail" },
                { "name": "Broken", "args": [ { "type": "s", "direction": "out" } ] },
                { "name": "Later", "optional": true },
            ],
            "signals": [ { "name": "Doubled", "args": [ { "type": "i" } ] } ],
        }))?;
        let calc = tree
            .implement("org.example.Calc")?
            .method("Double", |ctx, call| {
                let n = match call.body.first() {
                    Some(Value::Int32(n)) => *n,
                    _ => return Err(MethodError::invalid_args("expected an int")),
                };
                ctx.emit_signal("Doubled", vec![Value::Int32(n * 2)])?;
                Ok(Some(Value::Int32(n * 2)))
            })
            .method("Fail", |_, _| Err(MethodError::new("not a valid name", "nope")))
            .method("Broken", |_, _| Ok(Some(Value::Uint32(1))));
        tree.add_node(Node::new("/calc")?.with(calc))?;
        Ok(tree)
    }

    fn call(interface: Option<&str>, member: &str, body: Vec<Value>) -> Result<Message> {
        let mut call = Message::method_call(None, "/calc", interface, member)?.with_body(body);
        call.serial = 9;
        Ok(call)
    }

    fn run(tree: &mut ObjectTree, call: &Message) -> Option<Message> {
        let result = match dispatch(tree, call) {
            Ok(pending) => pending.now_or_never().unwrap_or_else(|| Ok(None)),
            Err(e) => Err(e),
        };
        reply_to(call, result)
    }

    fn error_name(reply: Option<Message>) -> Option<String> {
        reply.and_then(|r| r.error_name().map(str::to_owned))
    }

    #[test]
    fn successful_call_replies_with_out_value() -> Result<()> {
        let mut tree = tree()?;
        let call = call(Some("org.example.Calc"), "Double", vec![Value::Int32(21)])?;
        let reply = run(&mut tree, &call).ok_or(crate::error::Error::ZeroSerial)?;
        assert_eq!(reply.kind, MessageKind::MethodReturn);
        assert_eq!(reply.reply_serial(), Some(9));
        assert_eq!(reply.body, vec![Value::Int32(42)]);
        let signals = tree.take_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].member(), Some("Doubled"));
        Ok(())
    }

    #[test]
    fn lookup_failures_have_standard_names() -> Result<()> {
        let mut tree = tree()?;
        let mut nowhere = call(None, "Double", vec![])?;
        nowhere.fields.path = Some(ObjectPath::new("/nowhere")?);
        assert_eq!(
            error_name(run(&mut tree, &nowhere)).as_deref(),
            Some(names::UNKNOWN_OBJECT)
        );
        let cases = vec![
            (call(Some("org.example.Nope"), "Double", vec![])?, names::UNKNOWN_INTERFACE),
            (call(Some("org.example.Calc"), "Triple", vec![])?, names::UNKNOWN_METHOD),
            (call(Some("org.example.Calc"), "Later", vec![])?, names::NOT_SUPPORTED),
            (
                call(Some("org.example.Calc"), "Double", vec![Value::from("21")])?,
                names::INVALID_ARGS,
            ),
            (call(Some("org.example.Calc"), "Fail", vec![])?, names::FAILED),
            (call(Some("org.example.Calc"), "Broken", vec![])?, names::FAILED),
        ];
        for (call, expected) in cases {
            assert_eq!(error_name(run(&mut tree, &call)).as_deref(), Some(expected));
        }
        Ok(())
    }

    #[test]
    fn handler_error_keeps_its_message() -> Result<()> {
        let mut tree = tree()?;
        let call = call(Some("org.example.Calc"), "Fail", vec![])?;
        let reply = run(&mut tree, &call).ok_or(crate::error::Error::ZeroSerial)?;
        assert_eq!(reply.body, vec![Value::from("nope")]);
        Ok(())
    }

    #[test]
    fn member_without_interface_is_searched_for() -> Result<()> {
        let mut tree = tree()?;
        let call = call(None, "Double", vec![Value::Int32(2)])?;
        let reply = run(&mut tree, &call).ok_or(crate::error::Error::ZeroSerial)?;
        assert_eq!(reply.body, vec![Value::Int32(4)]);
        let ping = self::call(None, "Ping", vec![])?;
        let reply = run(&mut tree, &ping).ok_or(crate::error::Error::ZeroSerial)?;
        assert_eq!(reply.kind, MessageKind::MethodReturn);
        assert!(reply.body.is_empty());
        Ok(())
    }

    #[test]
    fn no_reply_expected_still_runs() -> Result<()> {
        let mut tree = tree()?;
        let call = call(Some("org.example.Calc"), "Double", vec![Value::Int32(1)])?
            .with_flags(Flags::NO_REPLY_EXPECTED);
        assert!(run(&mut tree, &call).is_none());
        assert_eq!(tree.take_signals().len(), 1);
        Ok(())
    }

    #[test]
    fn undeclared_signal_is_refused() -> Result<()> {
        let mut tree = tree()?;
        let path = ObjectPath::new("/calc")?;
        let mut ctx = CallContext {
            tree: &mut tree,
            path,
            interface: "org.example.Calc".to_owned(),
            sender: None,
        };
        assert!(ctx.emit_signal("Tripled", vec![]).is_err());
        assert!(ctx.emit_signal("Doubled", vec![Value::from("x")]).is_err());
        ctx.emit_signal("Doubled", vec![Value::Int32(1)])?;
        assert_eq!(ctx.tree_mut().take_signals().len(), 1);
        Ok(())
    }
}
