//! The path-indexed object tree and the interface registry it draws from.

use crate::error::{Error, MethodError, Result};
use crate::implementation::Implementation;
use crate::interface::{normalize_interface, Interface};
use crate::message::Message;
use crate::path::ObjectPath;
use crate::signature::Type;
use crate::standard;
use crate::value::{Array, Value};

use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// An object: a path plus one implementation per interface, kept in the order
/// they were added.
#[derive(Debug)]
pub struct Node {
    path: ObjectPath,
    implementations: Vec<Implementation>,
}

impl Node {
    /// `path` is normalized, so `//a/b/` names the node `/a/b`.
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self::at(ObjectPath::normalize(path)?))
    }

    pub fn at(path: ObjectPath) -> Self {
        Self {
            path,
            implementations: Vec::new(),
        }
    }

    pub fn with(mut self, implementation: Implementation) -> Self {
        self.implementations.push(implementation);
        self
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn implementations(&self) -> &[Implementation] {
        &self.implementations
    }

    pub fn implementation(&self, interface: &str) -> Option<&Implementation> {
        self.implementations.iter().find(|i| i.name() == interface)
    }

    fn implementation_mut(&mut self, interface: &str) -> Option<&mut Implementation> {
        self.implementations
            .iter_mut()
            .find(|i| i.name() == interface)
    }

    pub fn interface_names(&self) -> Vec<String> {
        self.implementations
            .iter()
            .map(|i| i.name().to_owned())
            .collect()
    }
}

/// Told about every change to the set of objects. Whatever signals an
/// observer returns are queued on the tree and sent by the connection.
pub trait TreeObserver: Send {
    fn interfaces_added(&mut self, node: &Node, interfaces: &[String]) -> Vec<Message>;
    fn interfaces_removed(&mut self, path: &ObjectPath, interfaces: &[String]) -> Vec<Message>;
}

pub struct ObjectTree {
    interfaces: HashMap<String, Arc<Interface>>,
    nodes: BTreeMap<ObjectPath, Node>,
    observers: Vec<Box<dyn TreeObserver>>,
    outbox: Vec<Message>,
}

impl ObjectTree {
    /// An empty tree with the standard interfaces registered.
    pub fn new() -> Result<Self> {
        let mut tree = Self {
            interfaces: HashMap::new(),
            nodes: BTreeMap::new(),
            observers: Vec::new(),
            outbox: Vec::new(),
        };
        for iface in standard::interfaces()? {
            tree.add_interface(iface)?;
        }
        Ok(tree)
    }

    pub fn register_interface(&mut self, raw: &serde_json::Value) -> Result<Arc<Interface>> {
        self.add_interface(normalize_interface(raw)?)
    }

    pub fn add_interface(&mut self, interface: Interface) -> Result<Arc<Interface>> {
        if self.interfaces.contains_key(&interface.name) {
            return Err(Error::InterfaceExists(interface.name));
        }
        let interface = Arc::new(interface);
        self.interfaces
            .insert(interface.name.clone(), interface.clone());
        Ok(interface)
    }

    pub fn interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces.get(name).cloned()
    }

    /// A blank implementation of a registered interface.
    pub fn implement(&self, interface: &str) -> Result<Implementation> {
        self.interface(interface)
            .map(Implementation::new)
            .ok_or_else(|| Error::UnknownInterface(interface.to_owned()))
    }

    fn check_implementation(&self, implementation: &Implementation) -> Result<()> {
        match self.interfaces.get(implementation.name()) {
            Some(registered) if **registered == **implementation.interface() => (),
            _ => return Err(Error::UnknownInterface(implementation.name().to_owned())),
        }
        implementation.validate()?;
        Ok(())
    }

    /// Registers `node`, adding the standard interfaces every object carries.
    pub fn add_node(&mut self, mut node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.path) {
            return Err(Error::NodeExists(node.path.to_string()));
        }
        let mut seen = HashSet::new();
        for implementation in &node.implementations {
            self.check_implementation(implementation)?;
            if !seen.insert(implementation.name()) {
                return Err(Error::DuplicateImplementation {
                    path: node.path.to_string(),
                    interface: implementation.name().to_owned(),
                });
            }
        }
        for implementation in standard::defaults(self)? {
            if node.implementation(implementation.name()).is_none() {
                node.implementations.push(implementation);
            }
        }
        let names = node.interface_names();
        debug!("adding node {} with {:?}", node.path, names);
        let path = node.path.clone();
        self.nodes.insert(path.clone(), node);
        self.notify_added(&path, &names);
        Ok(())
    }

    pub fn add_implementation(&mut self, path: &ObjectPath, implementation: Implementation) -> Result<()> {
        self.check_implementation(&implementation)?;
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::UnknownNode(path.to_string()))?;
        if node.implementation(implementation.name()).is_some() {
            return Err(Error::DuplicateImplementation {
                path: path.to_string(),
                interface: implementation.name().to_owned(),
            });
        }
        let names = vec![implementation.name().to_owned()];
        debug!("adding {} to {}", names[0], path);
        node.implementations.push(implementation);
        self.notify_added(path, &names);
        Ok(())
    }

    pub fn remove_node(&mut self, path: &ObjectPath) -> Result<Node> {
        let node = self
            .nodes
            .remove(path)
            .ok_or_else(|| Error::UnknownNode(path.to_string()))?;
        let names = node.interface_names();
        debug!("removed node {}", path);
        for observer in self.observers.iter_mut() {
            let signals = observer.interfaces_removed(path, &names);
            self.outbox.extend(signals);
        }
        Ok(node)
    }

    fn notify_added(&mut self, path: &ObjectPath, names: &[String]) {
        if let Some(node) = self.nodes.get(path) {
            for observer in self.observers.iter_mut() {
                let signals = observer.interfaces_added(node, names);
                self.outbox.extend(signals);
            }
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn TreeObserver>) {
        self.observers.push(observer);
    }

    /// Exact lookup; no prefix or fallback matching.
    pub fn node(&self, path: &ObjectPath) -> Option<&Node> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &ObjectPath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Every node strictly below `path`, found by prefix.
    pub fn descendants<'a>(&'a self, path: &'a ObjectPath) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |node| node.path.is_descendant_of(path))
    }

    /// Names of the path elements directly below `path` that lead to a node.
    pub fn child_names(&self, path: &ObjectPath) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .nodes
            .keys()
            .filter_map(|p| p.child_element_under(path))
            .collect();
        names.into_iter().map(str::to_owned).collect()
    }

    pub fn get_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> std::result::Result<&Value, MethodError> {
        let implementation = self
            .node(path)
            .ok_or_else(|| MethodError::unknown_object(path.as_str()))?
            .implementation(interface)
            .ok_or_else(|| MethodError::unknown_interface(interface))?;
        implementation
            .property_value(name)
            .ok_or_else(|| MethodError::unknown_property(interface, name))
    }

    /// Stores a new property value and queues `PropertiesChanged` when it
    /// differs from the old one. Access flags are not checked here: the owner
    /// may update read-only properties.
    pub fn set_property(
        &mut self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: Value,
    ) -> std::result::Result<(), MethodError> {
        let implementation = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| MethodError::unknown_object(path.as_str()))?
            .implementation_mut(interface)
            .ok_or_else(|| MethodError::unknown_interface(interface))?;
        let declared = implementation
            .interface()
            .property(name)
            .map(|p| p.ty.clone())
            .ok_or_else(|| MethodError::unknown_property(interface, name))?;
        let found = value.value_type();
        if found != declared {
            return Err(MethodError::invalid_args(format!(
                "Property '{}' has type '{}', not '{}'",
                name, declared, found
            )));
        }
        if implementation.property_value(name) == Some(&value) {
            return Ok(());
        }
        implementation.replace_property(name, value.clone());

        let changed = Array::dict(
            Type::String,
            Type::Variant,
            vec![(Value::from(name), Value::variant(value))],
        )?;
        let signal = Message::signal(
            path.as_str(),
            standard::PROPERTIES,
            "PropertiesChanged",
        )?
        .with_arg(interface)
        .with_arg(changed)
        .with_arg(Array::new(Type::String)?);
        self.outbox.push(signal);
        Ok(())
    }

    pub fn queue_signal(&mut self, signal: Message) {
        self.outbox.push(signal);
    }

    /// Drains the signals queued since the last call.
    pub fn take_signals(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }
}

impl fmt::Debug for ObjectTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTree")
            .field("interfaces", &self.interfaces.keys().collect::<BTreeSet<_>>())
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("observers", &self.observers.len())
            .field("queued", &self.outbox.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use serde_json::json;
    use test_log::test;

    fn tree() -> Result<ObjectTree> {
        let mut tree = ObjectTree::new()?;
        tree.register_interface(&json!({
            "name": "org.example.Item",
            "properties": [ { "name": "Label", "type": "s", "access": "read" } ],
        }))?;
        Ok(tree)
    }

    fn item(tree: &ObjectTree, label: &str) -> Result<Implementation> {
        Ok(tree.implement("org.example.Item")?.property("Label", label))
    }

    struct Recorder(Vec<String>);

    impl TreeObserver for Recorder {
        fn interfaces_added(&mut self, node: &Node, interfaces: &[String]) -> Vec<Message> {
            self.0.push(format!("+{} {}", node.path(), interfaces.len()));
            Vec::new()
        }

        fn interfaces_removed(&mut self, path: &ObjectPath, _: &[String]) -> Vec<Message> {
            match Message::signal(path.as_str(), "org.example.Item", "Gone") {
                Ok(signal) => vec![signal],
                Err(_) => Vec::new(),
            }
        }
    }

    #[test]
    fn nodes_get_standard_interfaces() -> Result<()> {
        let mut tree = tree()?;
        let imp = item(&tree, "a")?;
        tree.add_node(Node::new("//things/a/")?.with(imp))?;
        let node = tree
            .node(&ObjectPath::new("/things/a")?)
            .ok_or_else(|| Error::UnknownNode("/things/a".to_owned()))?;
        assert_eq!(
            node.interface_names(),
            vec![
                "org.example.Item",
                "org.freedesktop.DBus.Peer",
                "org.freedesktop.DBus.Introspectable",
                "org.freedesktop.DBus.Properties",
            ]
        );
        Ok(())
    }

    #[test]
    fn registration_errors() -> Result<()> {
        let mut tree = tree()?;
        tree.add_node(Node::new("/a")?)?;
        assert_eq!(
            tree.add_node(Node::new("/a")?),
            Err(Error::NodeExists("/a".to_owned()))
        );
        let imp = item(&tree, "x")?;
        assert!(matches!(
            tree.add_node(Node::new("/b")?.with(imp.clone()).with(imp.clone())),
            Err(Error::DuplicateImplementation { .. })
        ));
        let incomplete = tree.implement("org.example.Item")?;
        assert!(matches!(
            tree.add_node(Node::new("/c")?.with(incomplete)),
            Err(Error::Interface(_))
        ));
        assert!(matches!(
            tree.register_interface(&json!({ "name": "org.example.Item" })),
            Err(Error::InterfaceExists(_))
        ));
        assert!(matches!(
            tree.implement("org.example.Missing"),
            Err(Error::UnknownInterface(_))
        ));
        assert!(matches!(
            tree.add_implementation(&ObjectPath::new("/nope")?, imp),
            Err(Error::UnknownNode(_))
        ));
        Ok(())
    }

    #[test]
    fn children_by_prefix() -> Result<()> {
        let mut tree = tree()?;
        for path in ["/a", "/a/b", "/a/b/c", "/a/d/e", "/ab"] {
            tree.add_node(Node::new(path)?)?;
        }
        let a = ObjectPath::new("/a")?;
        let below: Vec<_> = tree.descendants(&a).map(|n| n.path().to_string()).collect();
        assert_eq!(below, vec!["/a/b", "/a/b/c", "/a/d/e"]);
        assert_eq!(tree.child_names(&a), vec!["b", "d"]);
        assert_eq!(tree.child_names(&ObjectPath::root()), vec!["a", "ab"]);
        Ok(())
    }

    #[test]
    fn observers_see_every_change() -> Result<()> {
        let mut tree = tree()?;
        tree.add_observer(Box::new(Recorder(Vec::new())));
        tree.add_node(Node::new("/a")?)?;
        let imp = item(&tree, "x")?;
        tree.add_implementation(&ObjectPath::new("/a")?, imp)?;
        tree.remove_node(&ObjectPath::new("/a")?)?;
        let signals = tree.take_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].member(), Some("Gone"));
        assert!(tree.take_signals().is_empty());
        assert!(tree.remove_node(&ObjectPath::new("/a")?).is_err());
        Ok(())
    }

    #[test]
    fn set_property_queues_one_change() -> Result<()> {
        let mut tree = tree()?;
        let imp = item(&tree, "old")?;
        tree.add_node(Node::new("/a")?.with(imp))?;
        let path = ObjectPath::new("/a")?;
        tree.set_property(&path, "org.example.Item", "Label", "new".into())?;
        tree.set_property(&path, "org.example.Item", "Label", "new".into())?;
        assert_eq!(
            tree.get_property(&path, "org.example.Item", "Label")?,
            &Value::from("new")
        );
        let signals = tree.take_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, MessageKind::Signal);
        assert_eq!(signals[0].body_signature(), "sa{sv}as");
        assert_eq!(signals[0].body[0], Value::from("org.example.Item"));
        assert!(tree
            .set_property(&path, "org.example.Item", "Label", 1u32.into())
            .is_err());
        assert_eq!(
            tree.set_property(&path, "org.example.Item", "Nope", 1u32.into())
                .map_err(|e| e.name),
            Err(crate::error::names::UNKNOWN_PROPERTY.to_owned())
        );
        Ok(())
    }
}
