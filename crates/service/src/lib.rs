//! ## Gateway core
//!
//! Everything the host side of the bridge needs that does not touch a
//! socket: the object registry, the dynamic object model, the return
//! classifier, import views and the reflection seam. The server crate
//! frames commands off the wire and drives a [`Gateway`] with them.

pub mod classify;
pub mod objects;
pub mod reflect;
pub mod registry;
pub mod views;

use std::{net::SocketAddr, sync::Arc};

use codec::{DEFAULT_VIEW_ID, ENTRY_POINT_ID, ReturnValue, STATIC_MARKER, Token};
use parking_lot::RwLock;

use self::{
    objects::{BoundError, HostValue, ObjectRef, PeerProxy},
    reflect::{CallTarget, Reflection},
    registry::ObjectRegistry,
    views::{DEFAULT_VIEW_NAME, View},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Malformed input, unknown tag, out-of-range access.
    Protocol(String),
    /// Id not bound and not a resolvable static id.
    UnknownObject(String),
    /// No overload matched, ambiguous member, receiver mismatch.
    Reflection(String),
    /// The invoked host code failed.
    Invocation(String),
    /// Socket closed, read or write failed, empty response, timeout.
    Network(String),
}

impl std::error::Error for BridgeError {}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::UnknownObject(_) => "unknown-object",
            Self::Reflection(_) => "reflection",
            Self::Invocation(_) => "invocation",
            Self::Network(_) => "network",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Protocol(message)
            | Self::UnknownObject(message)
            | Self::Reflection(message)
            | Self::Invocation(message)
            | Self::Network(message) => message,
        }
    }
}

/// Observer of gateway lifecycle events. Notifications are synchronous;
/// a failing listener is logged and never affects the operation that
/// triggered it, nor the remaining listeners.
pub trait GatewayListener: Send + Sync {
    fn on_server_started(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn on_server_stopped(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn on_connection_started(&self, address: SocketAddr) -> Result<(), BridgeError> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn on_connection_stopped(&self, address: SocketAddr) -> Result<(), BridgeError> {
        Ok(())
    }
}

pub struct GatewayOptions<R> {
    pub reflection: R,
    /// Root object the peer reaches through the well known id `t`.
    pub entry_point: Option<ObjectRef>,
}

/// The host-side facade: registry, reflection and classification behind
/// one handle, shared by every connection.
pub struct Gateway<R> {
    registry: ObjectRegistry,
    reflection: R,
    entry_point: Option<ObjectRef>,
    default_view: Arc<View>,
    listeners: RwLock<Vec<Arc<dyn GatewayListener>>>,
}

impl<R: Reflection> Gateway<R> {
    pub fn new(options: GatewayOptions<R>) -> Self {
        Self {
            registry: ObjectRegistry::default(),
            reflection: options.reflection,
            entry_point: options.entry_point,
            default_view: Arc::new(View::new(DEFAULT_VIEW_NAME)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Installs the well known bindings and notifies listeners. Must run
    /// before the first command is dispatched.
    pub fn startup(&self) {
        if let Some(entry_point) = &self.entry_point {
            self.registry.put(ENTRY_POINT_ID, entry_point.clone());
        }

        self.registry.put(DEFAULT_VIEW_ID, self.default_view.clone());
        self.notify("server started", |listener| listener.on_server_started());
    }

    /// Clears the registry. In-flight commands referencing released ids
    /// fail with object-not-found afterwards.
    pub fn shutdown(&self) {
        self.registry.clear();
        self.notify("server stopped", |listener| listener.on_server_stopped());
    }

    pub fn add_listener(&self, listener: Arc<dyn GatewayListener>) {
        self.listeners.write().push(listener);
    }

    pub fn connection_started(&self, address: SocketAddr) {
        self.notify("connection started", |listener| {
            listener.on_connection_started(address)
        });
    }

    pub fn connection_stopped(&self, address: SocketAddr) {
        self.notify("connection stopped", |listener| {
            listener.on_connection_stopped(address)
        });
    }

    fn notify(&self, event: &str, handle: impl Fn(&dyn GatewayListener) -> Result<(), BridgeError>) {
        for listener in self.listeners.read().iter() {
            if let Err(e) = handle(listener.as_ref()) {
                log::warn!("gateway listener failed: event={event}, err={e}");
            }
        }
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn reflection(&self) -> &R {
        &self.reflection
    }

    pub fn default_view(&self) -> &Arc<View> {
        &self.default_view
    }

    pub fn put_new_object(&self, object: ObjectRef) -> String {
        self.registry.put_new(object)
    }

    pub fn get_object(&self, id: &str) -> Option<ObjectRef> {
        self.registry.get(id)
    }

    pub fn delete_object(&self, id: &str) {
        self.registry.delete(id);
    }

    /// Resolves an id into a call receiver. Static ids resolve through
    /// the reflection capability (falling back to the default view for
    /// bare names) and are never registered.
    pub fn resolve_target(&self, id: &str) -> Result<CallTarget, BridgeError> {
        if let Some(name) = id.strip_prefix(STATIC_MARKER) {
            let fqn = self
                .resolve_class_name(name)
                .ok_or_else(|| BridgeError::UnknownObject(id.to_string()))?;

            return Ok(CallTarget::Static(fqn));
        }

        self.registry
            .get(id)
            .map(CallTarget::Instance)
            .ok_or_else(|| BridgeError::UnknownObject(id.to_string()))
    }

    /// Resolves a possibly bare class name, trying it verbatim first and
    /// then through the default view's imports.
    pub fn resolve_class_name(&self, name: &str) -> Option<String> {
        self.default_view
            .resolve(name, &|fqn| self.reflection.class_exists(fqn))
    }

    /// Decodes a wire token into a host value, looking references up in
    /// the registry and wrapping peer proxies.
    pub fn resolve_token(&self, token: Token) -> Result<HostValue, BridgeError> {
        Ok(match token {
            Token::Null => HostValue::Null,
            Token::Bool(value) => HostValue::Bool(value),
            Token::Int(value) => HostValue::Int(value),
            Token::Long(value) => HostValue::Long(value),
            Token::Double(value) => HostValue::Double(value),
            Token::Char(value) => HostValue::Char(value),
            Token::Str(value) => HostValue::Str(value),
            Token::Bytes(value) => HostValue::Bytes(value),
            Token::Decimal(value) => HostValue::Decimal(value),
            Token::Reference(id) => {
                if codec::is_static_id(&id) {
                    return Err(BridgeError::Protocol(format!(
                        "static reference not accepted as argument: {}",
                        id
                    )));
                }

                self.registry
                    .get(&id)
                    .map(HostValue::Object)
                    .ok_or(BridgeError::UnknownObject(id))?
            }
            Token::Proxy(id) => HostValue::Object(Arc::new(PeerProxy::new(id))),
        })
    }

    /// Encodes a host value for transmission to the peer as a command
    /// argument. Objects are registered so the peer can refer back to
    /// them; proxies travel home as their own peer-side id.
    pub fn value_to_token(&self, value: HostValue) -> Token {
        match value {
            HostValue::Null | HostValue::Void => Token::Null,
            HostValue::Bool(value) => Token::Bool(value),
            HostValue::Int(value) => Token::Int(value),
            HostValue::Long(value) => Token::Long(value),
            HostValue::Double(value) => Token::Double(value),
            HostValue::Char(value) => Token::Char(value),
            HostValue::Str(value) => Token::Str(value),
            HostValue::Bytes(value) => Token::Bytes(value),
            HostValue::Decimal(value) => Token::Decimal(value),
            HostValue::Object(object) => match object.as_proxy() {
                Some(proxy) => Token::Proxy(proxy.id.clone()),
                None => Token::Reference(self.registry.put_new(object)),
            },
        }
    }

    /// Classifies a host value into its return envelope, registering it
    /// when it is retained by id.
    pub fn classify(&self, value: HostValue) -> ReturnValue {
        classify::classify(&self.registry, value)
    }

    /// Binds a failure in the registry and folds it into an error
    /// envelope. Only reflection, invocation and network failures
    /// produce an inspectable throwable; protocol and unknown-object
    /// errors answer with their dedicated kinds.
    pub fn bind_error(&self, error: &BridgeError) -> ReturnValue {
        match error {
            BridgeError::UnknownObject(_) => ReturnValue::OBJECT_NOT_FOUND,
            BridgeError::Protocol(message) => ReturnValue::protocol_error(message.clone()),
            error => {
                let bound = Arc::new(BoundError::new(error.kind(), error.message()));
                ReturnValue::exception(self.registry.put_new(bound))
            }
        }
    }

    /// Invokes a method on a registered instance or a static class and
    /// classifies the result. All failures fold into error envelopes.
    pub fn invoke(&self, method: &str, target_id: &str, args: Vec<HostValue>) -> ReturnValue {
        match self.resolve_target(target_id) {
            Ok(target) => self.invoke_on(method, &target, args),
            Err(e) => self.bind_error(&e),
        }
    }

    pub fn invoke_on(&self, method: &str, target: &CallTarget, args: Vec<HostValue>) -> ReturnValue {
        let result = self
            .reflection
            .resolve_method(target, method, &args)
            .and_then(|callable| self.reflection.invoke(&callable, target, args));

        match result {
            Ok(value) => self.classify(value),
            Err(e) => self.bind_error(&e),
        }
    }

    /// Resolves a constructor by class name (bare names go through the
    /// default view), invokes it and classifies the new object.
    pub fn invoke_constructor(&self, class: &str, args: Vec<HostValue>) -> ReturnValue {
        let Some(fqn) = self.resolve_class_name(class) else {
            return self.bind_error(&BridgeError::Reflection(format!(
                "unknown class: {}",
                class
            )));
        };

        let result = self
            .reflection
            .resolve_constructor(&fqn, &args)
            .and_then(|callable| {
                self.reflection
                    .invoke(&callable, &CallTarget::Static(fqn), args)
            });

        match result {
            Ok(value) => self.classify(value),
            Err(e) => self.bind_error(&e),
        }
    }

    pub fn get_field(&self, target_id: &str, name: &str) -> ReturnValue {
        let result = self.resolve_target(target_id).and_then(|target| {
            self.reflection
                .resolve_field(&target, name)
                .and_then(|field| self.reflection.get_field(&field, &target))
        });

        match result {
            Ok(value) => self.classify(value),
            Err(e) => self.bind_error(&e),
        }
    }

    pub fn set_field(&self, target_id: &str, name: &str, value: HostValue) -> ReturnValue {
        let result = self.resolve_target(target_id).and_then(|target| {
            self.reflection
                .resolve_field(&target, name)
                .and_then(|field| self.reflection.set_field(&field, &target, value))
        });

        match result {
            Ok(()) => ReturnValue::Void,
            Err(e) => self.bind_error(&e),
        }
    }
}
