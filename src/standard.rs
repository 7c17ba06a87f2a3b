//! The `org.freedesktop.DBus.*` interfaces every object answers to, and the
//! opt-in object manager.
//!
//! They are ordinary schemas and implementations; nothing in the dispatcher
//! knows about them.

use crate::dispatch::CallContext;
use crate::error::{names, MethodError, Result};
use crate::implementation::Implementation;
use crate::interface::{normalize_interface, Access, Arg, Interface};
use crate::message::Message;
use crate::path::ObjectPath;
use crate::signature::Type;
use crate::tree::{Node, ObjectTree, TreeObserver};
use crate::value::{Array, DictEntry, Value};

use log::warn;
use serde_json::json;
use std::fs;

pub const PEER: &str = "org.freedesktop.DBus.Peer";
pub const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
pub const PROPERTIES: &str = "org.freedesktop.DBus.Properties";
pub const OBJECT_MANAGER: &str = "org.freedesktop.DBus.ObjectManager";

const MACHINE_ID_FILES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

const DOCTYPE: &str = "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n";

fn schemas() -> Vec<serde_json::Value> {
    vec![
        json!({
            "name": PEER,
            "methods": [
                { "name": "Ping" },
                { "name": "GetMachineId", "args": [
                    { "name": "machine_uuid", "type": "s", "direction": "out" } ] },
            ],
        }),
        json!({
            "name": INTROSPECTABLE,
            "methods": [
                { "name": "Introspect", "args": [
                    { "name": "xml_data", "type": "s", "direction": "out" } ] },
            ],
        }),
        json!({
            "name": PROPERTIES,
            "methods": [
                { "name": "Get", "args": [
                    { "name": "interface_name", "type": "s" },
                    { "name": "property_name", "type": "s" },
                    { "name": "value", "type": "v", "direction": "out" } ] },
                { "name": "Set", "args": [
                    { "name": "interface_name", "type": "s" },
                    { "name": "property_name", "type": "s" },
                    { "name": "value", "type": "v" } ] },
                { "name": "GetAll", "args": [
                    { "name": "interface_name", "type": "s" },
                    { "name": "props", "type": "a{sv}", "direction": "out" } ] },
            ],
            "signals": [
                { "name": "PropertiesChanged", "args": [
                    { "name": "interface_name", "type": "s" },
                    { "name": "changed_properties", "type": "a{sv}" },
                    { "name": "invalidated_properties", "type": "as" } ] },
            ],
        }),
        json!({
            "name": OBJECT_MANAGER,
            "methods": [
                { "name": "GetManagedObjects", "args": [
                    { "name": "objects", "type": "a{oa{sa{sv}}}", "direction": "out" } ] },
            ],
            "signals": [
                { "name": "InterfacesAdded", "args": [
                    { "name": "object_path", "type": "o" },
                    { "name": "interfaces_and_properties", "type": "a{sa{sv}}" } ] },
                { "name": "InterfacesRemoved", "args": [
                    { "name": "object_path", "type": "o" },
                    { "name": "interfaces", "type": "as" } ] },
            ],
        }),
    ]
}

pub(crate) fn interfaces() -> Result<Vec<Interface>> {
    schemas()
        .iter()
        .map(|raw| Ok(normalize_interface(raw)?))
        .collect()
}

/// Peer, Introspectable and Properties, in that order.
pub(crate) fn defaults(tree: &ObjectTree) -> Result<Vec<Implementation>> {
    Ok(vec![peer(tree)?, introspectable(tree)?, properties(tree)?])
}

fn peer(tree: &ObjectTree) -> Result<Implementation> {
    Ok(tree
        .implement(PEER)?
        .method("Ping", |_, _| Ok(None))
        .method("GetMachineId", |_, _| machine_id().map(|id| Some(Value::String(id)))))
}

fn machine_id() -> std::result::Result<String, MethodError> {
    for file in MACHINE_ID_FILES {
        if let Ok(contents) = fs::read_to_string(file) {
            let id = contents.trim();
            if !id.is_empty() {
                return Ok(id.to_owned());
            }
        }
    }
    Err(MethodError::failed("No machine id is available"))
}

fn string_arg(call: &Message, index: usize) -> std::result::Result<&str, MethodError> {
    call.body
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| MethodError::invalid_args(format!("Argument {} must be a string", index)))
}

fn property_access(
    ctx: &CallContext<'_>,
    interface: &str,
    name: &str,
) -> std::result::Result<Access, MethodError> {
    ctx.tree()
        .node(ctx.path())
        .ok_or_else(|| MethodError::unknown_object(ctx.path().as_str()))?
        .implementation(interface)
        .ok_or_else(|| MethodError::unknown_interface(interface))?
        .interface()
        .property(name)
        .map(|p| p.access)
        .ok_or_else(|| MethodError::unknown_property(interface, name))
}

fn properties_dict_type() -> Type {
    Type::Array(Box::new(Type::DictEntry(
        Box::new(Type::String),
        Box::new(Type::Variant),
    )))
}

/// Readable properties as `a{sv}`, in declaration order.
fn readable_properties(implementation: &Implementation) -> Result<Array> {
    let entries = implementation
        .interface()
        .properties
        .iter()
        .filter(|p| p.access.readable())
        .filter_map(|p| {
            implementation
                .property_value(&p.name)
                .map(|v| (Value::from(p.name.as_str()), Value::variant(v.clone())))
        });
    Array::dict(Type::String, Type::Variant, entries)
}

fn properties(tree: &ObjectTree) -> Result<Implementation> {
    Ok(tree
        .implement(PROPERTIES)?
        .method("Get", |ctx, call| {
            let interface = string_arg(call, 0)?;
            let name = string_arg(call, 1)?;
            if !property_access(ctx, interface, name)?.readable() {
                return Err(MethodError::new(
                    names::ACCESS_DENIED,
                    format!("Property '{}' is not readable", name),
                ));
            }
            let value = ctx.tree().get_property(ctx.path(), interface, name)?;
            Ok(Some(Value::variant(value.clone())))
        })
        .method("Set", |ctx, call| {
            let interface = string_arg(call, 0)?;
            let name = string_arg(call, 1)?;
            let value = match call.body.get(2) {
                Some(Value::Variant(inner)) => (**inner).clone(),
                _ => return Err(MethodError::invalid_args("Argument 2 must be a variant")),
            };
            if !property_access(ctx, interface, name)?.writable() {
                return Err(MethodError::new(
                    names::PROPERTY_READ_ONLY,
                    format!("Property '{}' is read-only", name),
                ));
            }
            let path = ctx.path().clone();
            ctx.tree_mut().set_property(&path, interface, name, value)?;
            Ok(None)
        })
        .method("GetAll", |ctx, call| {
            let interface = string_arg(call, 0)?;
            let implementation = ctx
                .tree()
                .node(ctx.path())
                .and_then(|node| node.implementation(interface))
                .ok_or_else(|| MethodError::unknown_interface(interface))?;
            Ok(Some(Value::Array(readable_properties(implementation)?)))
        }))
}

fn introspectable(tree: &ObjectTree) -> Result<Implementation> {
    Ok(tree
        .implement(INTROSPECTABLE)?
        .method("Introspect", |ctx, _| {
            let node = ctx
                .tree()
                .node(ctx.path())
                .ok_or_else(|| MethodError::unknown_object(ctx.path().as_str()))?;
            let children = ctx.tree().child_names(ctx.path());
            Ok(Some(Value::String(introspect(node, &children))))
        }))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn push_arg(xml: &mut String, arg: &Arg, with_direction: bool) {
    xml.push_str("      <arg");
    if let Some(name) = &arg.name {
        xml.push_str(&format!(" name=\"{}\"", escape(name)));
    }
    xml.push_str(&format!(" type=\"{}\"", escape(&arg.ty.signature())));
    if with_direction {
        xml.push_str(&format!(" direction=\"{}\"", arg.direction.as_str()));
    }
    xml.push_str("/>\n");
}

/// The introspection document for `node` and its immediate children.
pub fn introspect(node: &Node, children: &[String]) -> String {
    let mut xml = String::from(DOCTYPE);
    xml.push_str("<node>\n");
    for implementation in node.implementations() {
        let iface = implementation.interface();
        xml.push_str(&format!("  <interface name=\"{}\">\n", iface.name));
        for method in &iface.methods {
            xml.push_str(&format!("    <method name=\"{}\">\n", method.name));
            for arg in &method.args {
                push_arg(&mut xml, arg, true);
            }
            xml.push_str("    </method>\n");
        }
        for signal in &iface.signals {
            xml.push_str(&format!("    <signal name=\"{}\">\n", signal.name));
            for arg in &signal.args {
                push_arg(&mut xml, arg, false);
            }
            xml.push_str("    </signal>\n");
        }
        for property in &iface.properties {
            xml.push_str(&format!(
                "    <property name=\"{}\" type=\"{}\" access=\"{}\"/>\n",
                property.name,
                escape(&property.ty.signature()),
                property.access.as_str()
            ));
        }
        xml.push_str("  </interface>\n");
    }
    for child in children {
        xml.push_str(&format!("  <node name=\"{}\"/>\n", child));
    }
    xml.push_str("</node>\n");
    xml
}

fn interfaces_and_properties(node: &Node, interfaces: &[String]) -> Result<Value> {
    let mut entries = Vec::with_capacity(interfaces.len());
    for implementation in interfaces.iter().filter_map(|n| node.implementation(n)) {
        entries.push((
            Value::from(implementation.name()),
            Value::Array(readable_properties(implementation)?),
        ));
    }
    Ok(Value::Array(Array::dict(
        Type::String,
        properties_dict_type(),
        entries,
    )?))
}

pub fn object_manager(tree: &ObjectTree) -> Result<Implementation> {
    Ok(tree
        .implement(OBJECT_MANAGER)?
        .method("GetManagedObjects", |ctx, _| {
            let entry_type = Type::DictEntry(
                Box::new(Type::ObjectPath),
                Box::new(Type::Array(Box::new(Type::DictEntry(
                    Box::new(Type::String),
                    Box::new(properties_dict_type()),
                )))),
            );
            let mut objects = Array::new(entry_type)?;
            for node in ctx.tree().descendants(ctx.path()) {
                let interfaces = interfaces_and_properties(node, &node.interface_names())?;
                objects.push(Value::DictEntry(DictEntry::new(
                    Value::ObjectPath(node.path().clone()),
                    interfaces,
                )?))?;
            }
            Ok(Some(Value::Array(objects)))
        }))
}

/// Announces objects appearing and disappearing below `root`.
pub struct ObjectManagerObserver {
    root: ObjectPath,
}

impl ObjectManagerObserver {
    pub fn new(root: ObjectPath) -> Self {
        Self { root }
    }

    fn added(&self, node: &Node, interfaces: &[String]) -> Result<Message> {
        Ok(
            Message::signal(self.root.as_str(), OBJECT_MANAGER, "InterfacesAdded")?
                .with_arg(node.path().clone())
                .with_arg(interfaces_and_properties(node, interfaces)?),
        )
    }

    fn removed(&self, path: &ObjectPath, interfaces: &[String]) -> Result<Message> {
        let names = interfaces
            .iter()
            .map(|name| Value::from(name.as_str()))
            .collect();
        Ok(
            Message::signal(self.root.as_str(), OBJECT_MANAGER, "InterfacesRemoved")?
                .with_arg(path.clone())
                .with_arg(Array::with_signature("s", names)?),
        )
    }
}

impl TreeObserver for ObjectManagerObserver {
    fn interfaces_added(&mut self, node: &Node, interfaces: &[String]) -> Vec<Message> {
        if !node.path().is_descendant_of(&self.root) {
            return Vec::new();
        }
        match self.added(node, interfaces) {
            Ok(signal) => vec![signal],
            Err(e) => {
                warn!("cannot announce {}: {}", node.path(), e);
                Vec::new()
            }
        }
    }

    fn interfaces_removed(&mut self, path: &ObjectPath, interfaces: &[String]) -> Vec<Message> {
        if !path.is_descendant_of(&self.root) {
            return Vec::new();
        }
        match self.removed(path, interfaces) {
            Ok(signal) => vec![signal],
            Err(e) => {
                warn!("cannot announce removal of {}: {}", path, e);
                Vec::new()
            }
        }
    }
}

/// Puts an object manager at `path`, creating the node if needed, and starts
/// announcing changes below it.
pub fn install_object_manager(tree: &mut ObjectTree, path: &str) -> Result<()> {
    let path = ObjectPath::normalize(path)?;
    let manager = object_manager(tree)?;
    if tree.contains(&path) {
        tree.add_implementation(&path, manager)?;
    } else {
        tree.add_node(Node::at(path.clone()).with(manager))?;
    }
    tree.add_observer(Box::new(ObjectManagerObserver::new(path)));
    Ok(())
}
