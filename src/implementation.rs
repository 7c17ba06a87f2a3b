//! Concrete implementations of interfaces: one handler per method and one
//! value per property.

use crate::dispatch::CallContext;
use crate::error::{InterfaceError, MethodError};
use crate::interface::Interface;
use crate::message::Message;
use crate::value::Value;

use futures_util::future::{self, BoxFuture, FutureExt};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What every handler eventually produces: the single "out" value, if the
/// method has one.
pub type MethodFuture = BoxFuture<'static, Result<Option<Value>, MethodError>>;

pub type MethodHandler =
    Arc<dyn Fn(&mut CallContext<'_>, &Message) -> MethodFuture + Send + Sync>;

#[derive(Clone)]
pub struct Implementation {
    interface: Arc<Interface>,
    methods: HashMap<String, MethodHandler>,
    properties: IndexMap<String, Value>,
}

impl Implementation {
    pub fn new(interface: Arc<Interface>) -> Self {
        Self {
            interface,
            methods: HashMap::new(),
            properties: IndexMap::new(),
        }
    }

    /// Registers a handler that answers immediately.
    pub fn method<F>(self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &Message) -> Result<Option<Value>, MethodError>
            + Send
            + Sync
            + 'static,
    {
        self.method_async(name, move |ctx, call| future::ready(handler(ctx, call)))
    }

    /// Registers a handler whose answer arrives later. The future must not
    /// borrow the context; copy out what it needs first.
    pub fn method_async<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, MethodError>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |ctx: &mut CallContext<'_>, call: &Message| {
            handler(ctx, call).boxed()
        });
        self.methods.insert(name.to_owned(), handler);
        self
    }

    pub fn property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_owned(), value.into());
        self
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub fn name(&self) -> &str {
        &self.interface.name
    }

    pub fn handler(&self, method: &str) -> Option<&MethodHandler> {
        self.methods.get(method)
    }

    pub fn property_value(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Property values in the order they were provided.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn replace_property(&mut self, name: &str, value: Value) {
        self.properties.insert(name.to_owned(), value);
    }

    pub fn validate(&self) -> Result<(), InterfaceError> {
        validate_implementation(&self.interface, self)
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Implementation")
            .field("interface", &self.interface.name)
            .field("methods", &methods)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Checks `implementation` against `interface`. Values are never coerced: a
/// property must already hold exactly the declared type.
pub fn validate_implementation(
    interface: &Interface,
    implementation: &Implementation,
) -> Result<(), InterfaceError> {
    for method in &interface.methods {
        if !method.optional && !implementation.methods.contains_key(&method.name) {
            return Err(InterfaceError::MissingMethod {
                interface: interface.name.clone(),
                method: method.name.clone(),
            });
        }
    }
    for name in implementation.methods.keys() {
        if interface.method(name).is_none() {
            return Err(InterfaceError::UndeclaredMethod {
                interface: interface.name.clone(),
                member: name.clone(),
            });
        }
    }
    for property in &interface.properties {
        match implementation.properties.get(&property.name) {
            None if property.optional => (),
            None => {
                return Err(InterfaceError::MissingProperty {
                    interface: interface.name.clone(),
                    property: property.name.clone(),
                })
            }
            Some(value) => {
                let found = value.value_type();
                if found != property.ty {
                    return Err(InterfaceError::PropertyType {
                        interface: interface.name.clone(),
                        property: property.name.clone(),
                        expected: property.ty.signature(),
                        found: found.signature(),
                    });
                }
            }
        }
    }
    for name in implementation.properties.keys() {
        if interface.property(name).is_none() {
            return Err(InterfaceError::UndeclaredProperty {
                interface: interface.name.clone(),
                member: name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::normalize_interface;
    use serde_json::json;
    use test_log::test;

    fn counter() -> Result<Arc<Interface>, InterfaceError> {
        Ok(Arc::new(normalize_interface(&json!({
            "name": "org.example.Counter",
            "methods": [
                { "name": "Add", "args": [ { "type": "u" }, { "type": "u", "direction": "out" } ] },
                { "name": "Reset", "optional": true },
            ],
            "properties": [
                { "name": "Total", "type": "u", "access": "read" },
                { "name": "Label", "type": "s", "optional": true },
            ],
        }))?))
    }

    fn ok(_: &mut CallContext<'_>, _: &Message) -> Result<Option<Value>, MethodError> {
        Ok(None)
    }

    #[test]
    fn complete_implementation_validates() -> Result<(), InterfaceError> {
        let imp = Implementation::new(counter()?)
            .method("Add", ok)
            .property("Total", 0u32);
        imp.validate()?;
        assert_eq!(imp.name(), "org.example.Counter");
        assert!(imp.handler("Add").is_some());
        assert!(imp.handler("Reset").is_none());
        Ok(())
    }

    #[test]
    fn missing_members_are_rejected() -> Result<(), InterfaceError> {
        let iface = counter()?;
        assert_eq!(
            Implementation::new(iface.clone()).property("Total", 0u32).validate(),
            Err(InterfaceError::MissingMethod {
                interface: "org.example.Counter".to_owned(),
                method: "Add".to_owned(),
            })
        );
        assert_eq!(
            Implementation::new(iface).method("Add", ok).validate(),
            Err(InterfaceError::MissingProperty {
                interface: "org.example.Counter".to_owned(),
                property: "Total".to_owned(),
            })
        );
        Ok(())
    }

    #[test]
    fn property_types_are_strict() -> Result<(), InterfaceError> {
        let imp = Implementation::new(counter()?)
            .method("Add", ok)
            .property("Total", 0i32);
        assert_eq!(
            imp.validate(),
            Err(InterfaceError::PropertyType {
                interface: "org.example.Counter".to_owned(),
                property: "Total".to_owned(),
                expected: "u".to_owned(),
                found: "i".to_owned(),
            })
        );
        let optional_wrong = Implementation::new(counter()?)
            .method("Add", ok)
            .property("Total", 0u32)
            .property("Label", 1u32);
        assert!(matches!(
            optional_wrong.validate(),
            Err(InterfaceError::PropertyType { .. })
        ));
        Ok(())
    }

    #[test]
    fn undeclared_members_are_rejected() -> Result<(), InterfaceError> {
        let imp = Implementation::new(counter()?)
            .method("Add", ok)
            .method("Subtract", ok)
            .property("Total", 0u32);
        assert_eq!(
            imp.validate(),
            Err(InterfaceError::UndeclaredMethod {
                interface: "org.example.Counter".to_owned(),
                member: "Subtract".to_owned(),
            })
        );
        Ok(())
    }
}
