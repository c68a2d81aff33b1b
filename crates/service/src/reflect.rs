//! Reflection capability.
//!
//! The gateway does not know how host types expose constructors, methods
//! and fields; it only needs something that can resolve them by name and
//! argument compatibility and invoke the result. [`Reflection`] is that
//! seam. [`ClassRegistry`] is the in-tree implementation: embedders
//! register bindings per fully qualified class name, instances are
//! matched back through [`HostObject::type_name`].

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    BridgeError,
    objects::{HostObject, HostValue, ObjectRef},
};

/// The receiver of a call: a live instance, or a class named by a
/// static id with the marker stripped.
#[derive(Clone)]
pub enum CallTarget {
    Instance(ObjectRef),
    Static(String),
}

impl CallTarget {
    pub fn type_name(&self) -> &str {
        match self {
            Self::Instance(object) => object.type_name(),
            Self::Static(name) => name,
        }
    }
}

/// Declared parameter kind of a registered overload, used for
/// argument-compatibility resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Any,
    Bool,
    Int,
    Long,
    Double,
    Char,
    Str,
    Bytes,
    Decimal,
    Object,
}

impl ParamKind {
    /// Widening numeric arguments are accepted, everything else matches
    /// its own kind. `Str` and `Object` additionally accept null.
    pub fn accepts(&self, value: &HostValue) -> bool {
        match self {
            Self::Any => true,
            Self::Bool => matches!(value, HostValue::Bool(_)),
            Self::Int => matches!(value, HostValue::Int(_)),
            Self::Long => matches!(value, HostValue::Int(_) | HostValue::Long(_)),
            Self::Double => matches!(
                value,
                HostValue::Int(_) | HostValue::Long(_) | HostValue::Double(_)
            ),
            Self::Char => matches!(value, HostValue::Char(_)),
            Self::Str => matches!(value, HostValue::Str(_) | HostValue::Null),
            Self::Bytes => matches!(value, HostValue::Bytes(_)),
            Self::Decimal => matches!(value, HostValue::Decimal(_)),
            Self::Object => matches!(value, HostValue::Object(_) | HostValue::Null),
        }
    }
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Char => "char",
            Self::Str => "string",
            Self::Bytes => "bytes",
            Self::Decimal => "decimal",
            Self::Object => "object",
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Constructor,
    Instance,
    Static,
    /// No binding matched; the object answers the call itself through
    /// [`HostObject::invoke`].
    SelfDispatch,
}

/// A resolved, not yet invoked, callable.
pub struct Callable {
    class: String,
    name: String,
    kind: CallKind,
    index: usize,
}

/// A resolved field access.
pub struct FieldHandle {
    class: String,
    name: String,
}

/// Resolves and invokes host callables. Implementations must be
/// stateless with respect to calls and safe to share across
/// connections.
pub trait Reflection: Send + Sync {
    fn resolve_constructor(
        &self,
        class: &str,
        args: &[HostValue],
    ) -> Result<Callable, BridgeError>;

    fn resolve_method(
        &self,
        target: &CallTarget,
        name: &str,
        args: &[HostValue],
    ) -> Result<Callable, BridgeError>;

    fn resolve_field(&self, target: &CallTarget, name: &str) -> Result<FieldHandle, BridgeError>;

    fn invoke(
        &self,
        callable: &Callable,
        target: &CallTarget,
        args: Vec<HostValue>,
    ) -> Result<HostValue, BridgeError>;

    fn get_field(
        &self,
        field: &FieldHandle,
        target: &CallTarget,
    ) -> Result<HostValue, BridgeError>;

    fn set_field(
        &self,
        field: &FieldHandle,
        target: &CallTarget,
        value: HostValue,
    ) -> Result<(), BridgeError>;

    fn class_exists(&self, fqn: &str) -> bool;

    fn package_exists(&self, prefix: &str) -> bool;

    /// Pretty printed signature page for the help command.
    fn describe(&self, target: &CallTarget) -> Result<String, BridgeError>;

    /// Member names of a class or instance.
    fn members(&self, target: &CallTarget) -> Result<Vec<String>, BridgeError>;

    /// Names directly under a package prefix: simple class names and
    /// child package segments.
    fn package_members(&self, prefix: &str) -> Vec<String>;
}

type ConstructorFn = Arc<dyn Fn(Vec<HostValue>) -> Result<HostValue, BridgeError> + Send + Sync>;
type MethodFn =
    Arc<dyn Fn(&ObjectRef, Vec<HostValue>) -> Result<HostValue, BridgeError> + Send + Sync>;
type GetterFn = Arc<dyn Fn(&ObjectRef) -> Result<HostValue, BridgeError> + Send + Sync>;
type SetterFn = Arc<dyn Fn(&ObjectRef, HostValue) -> Result<(), BridgeError> + Send + Sync>;
type StaticGetterFn = Arc<dyn Fn() -> Result<HostValue, BridgeError> + Send + Sync>;

struct Overload<F> {
    params: Vec<ParamKind>,
    body: F,
}

impl<F> Overload<F> {
    fn accepts(&self, args: &[HostValue]) -> bool {
        self.params.len() == args.len()
            && self
                .params
                .iter()
                .zip(args)
                .all(|(param, arg)| param.accepts(arg))
    }

    fn signature(&self, name: &str) -> String {
        let params = self
            .params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        format!("{}({})", name, params)
    }
}

enum FieldBinding {
    Instance {
        get: GetterFn,
        set: Option<SetterFn>,
    },
    Static {
        get: StaticGetterFn,
    },
}

/// One registered class: constructors, methods, static methods and
/// fields, all closures over the concrete host type. Built fluently:
///
/// ```
/// use bridge_server_service::reflect::{ClassBinding, downcast};
/// use bridge_server_service::objects::HostValue;
///
/// struct Counter(std::sync::atomic::AtomicI64);
///
/// impl bridge_server_service::objects::HostObject for Counter {
///     fn type_name(&self) -> &str {
///         "demo.Counter"
///     }
///
///     fn as_any(&self) -> &dyn std::any::Any {
///         self
///     }
/// }
///
/// let binding = ClassBinding::new("demo.Counter")
///     .constructor(&[], |_| Ok(HostValue::object(Counter(Default::default()))))
///     .method("increment", &[], |object, _| {
///         let counter: &Counter = downcast(object)?;
///         Ok(HostValue::Long(
///             counter.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1,
///         ))
///     });
/// ```
pub struct ClassBinding {
    name: String,
    constructors: Vec<Overload<ConstructorFn>>,
    methods: AHashMap<String, Vec<Overload<MethodFn>>>,
    statics: AHashMap<String, Vec<Overload<ConstructorFn>>>,
    fields: AHashMap<String, FieldBinding>,
}

impl ClassBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructors: Vec::new(),
            methods: AHashMap::new(),
            statics: AHashMap::new(),
            fields: AHashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constructor(
        mut self,
        params: &[ParamKind],
        body: impl Fn(Vec<HostValue>) -> Result<HostValue, BridgeError> + Send + Sync + 'static,
    ) -> Self {
        self.constructors.push(Overload {
            params: params.to_vec(),
            body: Arc::new(body),
        });

        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        params: &[ParamKind],
        body: impl Fn(&ObjectRef, Vec<HostValue>) -> Result<HostValue, BridgeError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.methods.entry(name.into()).or_default().push(Overload {
            params: params.to_vec(),
            body: Arc::new(body),
        });

        self
    }

    pub fn static_method(
        mut self,
        name: impl Into<String>,
        params: &[ParamKind],
        body: impl Fn(Vec<HostValue>) -> Result<HostValue, BridgeError> + Send + Sync + 'static,
    ) -> Self {
        self.statics.entry(name.into()).or_default().push(Overload {
            params: params.to_vec(),
            body: Arc::new(body),
        });

        self
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        get: impl Fn(&ObjectRef) -> Result<HostValue, BridgeError> + Send + Sync + 'static,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldBinding::Instance {
                get: Arc::new(get),
                set: None,
            },
        );

        self
    }

    pub fn mutable_field(
        mut self,
        name: impl Into<String>,
        get: impl Fn(&ObjectRef) -> Result<HostValue, BridgeError> + Send + Sync + 'static,
        set: impl Fn(&ObjectRef, HostValue) -> Result<(), BridgeError> + Send + Sync + 'static,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldBinding::Instance {
                get: Arc::new(get),
                set: Some(Arc::new(set)),
            },
        );

        self
    }

    pub fn static_field(
        mut self,
        name: impl Into<String>,
        get: impl Fn() -> Result<HostValue, BridgeError> + Send + Sync + 'static,
    ) -> Self {
        self.fields
            .insert(name.into(), FieldBinding::Static { get: Arc::new(get) });

        self
    }
}

/// Downcasts a receiver to its concrete host type inside a method body.
pub fn downcast<T: 'static>(object: &ObjectRef) -> Result<&T, BridgeError> {
    object.as_any().downcast_ref::<T>().ok_or_else(|| {
        BridgeError::Reflection(format!("unexpected receiver type {}", object.type_name()))
    })
}

/// Class bindings keyed by fully qualified name.
#[derive(Default)]
pub struct ClassRegistry {
    classes: RwLock<AHashMap<String, Arc<ClassBinding>>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the container classes, so peers can
    /// create lists, maps, sets, arrays and blobs by constructor.
    pub fn with_builtins() -> Self {
        use crate::objects::{HostArray, HostBlob, HostList, HostMap, HostSet};

        let registry = Self::new();
        registry.register(
            ClassBinding::new(crate::objects::LIST_TYPE)
                .constructor(&[], |_| Ok(HostValue::object(HostList::default()))),
        );
        registry.register(
            ClassBinding::new(crate::objects::MAP_TYPE)
                .constructor(&[], |_| Ok(HostValue::object(HostMap::default()))),
        );
        registry.register(
            ClassBinding::new(crate::objects::SET_TYPE)
                .constructor(&[], |_| Ok(HostValue::object(HostSet::default()))),
        );
        registry.register(
            ClassBinding::new(crate::objects::ARRAY_TYPE).constructor(
                &[ParamKind::Int],
                |mut args| {
                    let HostValue::Int(length) = args.remove(0) else {
                        return Err(BridgeError::Reflection("array length must be int".into()));
                    };

                    Ok(HostValue::object(HostArray::filled(length.max(0) as usize)))
                },
            ),
        );
        registry.register(
            ClassBinding::new(crate::objects::BLOB_TYPE)
                .constructor(&[], |_| Ok(HostValue::object(HostBlob::default()))),
        );

        registry
    }

    pub fn register(&self, binding: ClassBinding) {
        self.classes
            .write()
            .insert(binding.name.clone(), Arc::new(binding));
    }

    fn binding(&self, fqn: &str) -> Option<Arc<ClassBinding>> {
        self.classes.read().get(fqn).cloned()
    }

    fn unknown_class(fqn: &str) -> BridgeError {
        BridgeError::Reflection(format!("unknown class: {}", fqn))
    }
}

impl Reflection for ClassRegistry {
    fn resolve_constructor(&self, class: &str, args: &[HostValue]) -> Result<Callable, BridgeError> {
        let binding = self.binding(class).ok_or_else(|| Self::unknown_class(class))?;
        let index = binding
            .constructors
            .iter()
            .position(|overload| overload.accepts(args))
            .ok_or_else(|| {
                BridgeError::Reflection(format!(
                    "no constructor of {} accepts {} argument(s)",
                    class,
                    args.len()
                ))
            })?;

        Ok(Callable {
            class: class.to_string(),
            name: String::new(),
            kind: CallKind::Constructor,
            index,
        })
    }

    fn resolve_method(
        &self,
        target: &CallTarget,
        name: &str,
        args: &[HostValue],
    ) -> Result<Callable, BridgeError> {
        let class = target.type_name().to_string();
        match target {
            CallTarget::Instance(_) => {
                if let Some(binding) = self.binding(&class)
                    && let Some(overloads) = binding.methods.get(name)
                    && let Some(index) =
                        overloads.iter().position(|overload| overload.accepts(args))
                {
                    return Ok(Callable {
                        class,
                        name: name.to_string(),
                        kind: CallKind::Instance,
                        index,
                    });
                }

                // Views, bound errors and the like answer calls
                // themselves; whether the method exists is only known
                // at invocation.
                Ok(Callable {
                    class,
                    name: name.to_string(),
                    kind: CallKind::SelfDispatch,
                    index: 0,
                })
            }
            CallTarget::Static(_) => {
                let binding = self.binding(&class).ok_or_else(|| Self::unknown_class(&class))?;
                let overloads = binding.statics.get(name).ok_or_else(|| {
                    BridgeError::Reflection(format!("no static method {} on {}", name, class))
                })?;

                let index = overloads
                    .iter()
                    .position(|overload| overload.accepts(args))
                    .ok_or_else(|| {
                        BridgeError::Reflection(format!(
                            "no overload of {}.{} accepts {} argument(s)",
                            class,
                            name,
                            args.len()
                        ))
                    })?;

                Ok(Callable {
                    class,
                    name: name.to_string(),
                    kind: CallKind::Static,
                    index,
                })
            }
        }
    }

    fn resolve_field(&self, target: &CallTarget, name: &str) -> Result<FieldHandle, BridgeError> {
        let class = target.type_name().to_string();
        let binding = self.binding(&class).ok_or_else(|| Self::unknown_class(&class))?;
        let field = binding
            .fields
            .get(name)
            .ok_or_else(|| BridgeError::Reflection(format!("no field {} on {}", name, class)))?;

        match (field, target) {
            (FieldBinding::Instance { .. }, CallTarget::Instance(_))
            | (FieldBinding::Static { .. }, CallTarget::Static(_)) => Ok(FieldHandle {
                class,
                name: name.to_string(),
            }),
            _ => Err(BridgeError::Reflection(format!(
                "field {} on {} does not match the receiver kind",
                name, class
            ))),
        }
    }

    fn invoke(
        &self,
        callable: &Callable,
        target: &CallTarget,
        args: Vec<HostValue>,
    ) -> Result<HostValue, BridgeError> {
        match callable.kind {
            CallKind::Constructor => {
                let binding = self
                    .binding(&callable.class)
                    .ok_or_else(|| Self::unknown_class(&callable.class))?;
                (binding.constructors[callable.index].body)(args)
            }
            CallKind::Instance => {
                let CallTarget::Instance(object) = target else {
                    return Err(BridgeError::Reflection(
                        "instance method invoked without receiver".into(),
                    ));
                };

                let binding = self
                    .binding(&callable.class)
                    .ok_or_else(|| Self::unknown_class(&callable.class))?;
                (binding.methods[&callable.name][callable.index].body)(object, args)
            }
            CallKind::Static => {
                let binding = self
                    .binding(&callable.class)
                    .ok_or_else(|| Self::unknown_class(&callable.class))?;
                (binding.statics[&callable.name][callable.index].body)(args)
            }
            CallKind::SelfDispatch => {
                let CallTarget::Instance(object) = target else {
                    return Err(BridgeError::Reflection(
                        "self dispatch invoked without receiver".into(),
                    ));
                };

                object.invoke(&callable.name, &args).unwrap_or_else(|| {
                    Err(BridgeError::Reflection(format!(
                        "no method {} on {}",
                        callable.name, callable.class
                    )))
                })
            }
        }
    }

    fn get_field(&self, field: &FieldHandle, target: &CallTarget) -> Result<HostValue, BridgeError> {
        let binding = self
            .binding(&field.class)
            .ok_or_else(|| Self::unknown_class(&field.class))?;

        match (&binding.fields[&field.name], target) {
            (FieldBinding::Instance { get, .. }, CallTarget::Instance(object)) => get(object),
            (FieldBinding::Static { get }, CallTarget::Static(_)) => get(),
            _ => Err(BridgeError::Reflection(format!(
                "field {} on {} does not match the receiver kind",
                field.name, field.class
            ))),
        }
    }

    fn set_field(
        &self,
        field: &FieldHandle,
        target: &CallTarget,
        value: HostValue,
    ) -> Result<(), BridgeError> {
        let binding = self
            .binding(&field.class)
            .ok_or_else(|| Self::unknown_class(&field.class))?;

        match (&binding.fields[&field.name], target) {
            (FieldBinding::Instance { set: Some(set), .. }, CallTarget::Instance(object)) => {
                set(object, value)
            }
            (FieldBinding::Instance { set: None, .. }, _) => Err(BridgeError::Reflection(
                format!("field {} on {} is read only", field.name, field.class),
            )),
            _ => Err(BridgeError::Reflection(format!(
                "field {} on {} does not match the receiver kind",
                field.name, field.class
            ))),
        }
    }

    fn class_exists(&self, fqn: &str) -> bool {
        self.classes.read().contains_key(fqn)
    }

    fn package_exists(&self, prefix: &str) -> bool {
        let prefix = format!("{}.", prefix);
        self.classes
            .read()
            .keys()
            .any(|name| name.starts_with(&prefix))
    }

    fn describe(&self, target: &CallTarget) -> Result<String, BridgeError> {
        let class = target.type_name();
        let binding = self.binding(class).ok_or_else(|| Self::unknown_class(class))?;

        let mut lines = Vec::new();
        for constructor in &binding.constructors {
            lines.push(format!("    {}", constructor.signature(&binding.name)));
        }

        for (name, overloads) in &binding.methods {
            for overload in overloads {
                lines.push(format!("    {}", overload.signature(name)));
            }
        }

        for (name, overloads) in &binding.statics {
            for overload in overloads {
                lines.push(format!("    static {}", overload.signature(name)));
            }
        }

        for name in binding.fields.keys() {
            lines.push(format!("    field {}", name));
        }

        lines.sort();
        Ok(format!(
            "Help on {} in the host gateway:\n\n{} {{\n{}\n}}",
            binding.name,
            binding.name,
            lines.join("\n")
        ))
    }

    fn members(&self, target: &CallTarget) -> Result<Vec<String>, BridgeError> {
        let class = target.type_name();
        let Some(binding) = self.binding(class) else {
            // Self dispatching objects carry no declared member list.
            return match target {
                CallTarget::Instance(_) => Ok(Vec::new()),
                CallTarget::Static(_) => Err(Self::unknown_class(class)),
            };
        };

        let mut members: Vec<String> = binding
            .methods
            .keys()
            .chain(binding.statics.keys())
            .chain(binding.fields.keys())
            .cloned()
            .collect();

        members.sort();
        members.dedup();
        Ok(members)
    }

    fn package_members(&self, prefix: &str) -> Vec<String> {
        let prefix = format!("{}.", prefix);
        let mut members: Vec<String> = self
            .classes
            .read()
            .keys()
            .filter_map(|name| name.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('.') {
                Some((segment, _)) => segment.to_string(),
                None => rest.to_string(),
            })
            .collect();

        members.sort();
        members.dedup();
        members
    }
}
