//! The return classifier.
//!
//! Decides whether a host value crosses the wire as a primitive or is
//! retained by id, and under which semantic category. The peer receives
//! structural metadata (size, length) only for containers with cheap,
//! well defined cardinality.

use codec::{ReturnValue, Token};

use crate::{objects::HostValue, registry::ObjectRegistry};

/// Classification precedence, first capability wins: list, map, array,
/// set, iterator, plain reference. A value that is both list-like and
/// iterator-like therefore classifies as a list.
pub fn classify(registry: &ObjectRegistry, value: HostValue) -> ReturnValue {
    let object = match value {
        HostValue::Void => return ReturnValue::Void,
        HostValue::Null => return ReturnValue::Null,
        HostValue::Bool(value) => return ReturnValue::Primitive(Token::Bool(value)),
        HostValue::Int(value) => return ReturnValue::Primitive(Token::Int(value)),
        HostValue::Long(value) => return ReturnValue::Primitive(Token::Long(value)),
        HostValue::Double(value) => return ReturnValue::Primitive(Token::Double(value)),
        HostValue::Char(value) => return ReturnValue::Primitive(Token::Char(value)),
        HostValue::Str(value) => return ReturnValue::Primitive(Token::Str(value)),
        HostValue::Bytes(value) => return ReturnValue::Primitive(Token::Bytes(value)),
        HostValue::Decimal(value) => return ReturnValue::Primitive(Token::Decimal(value)),
        HostValue::Object(object) => object,
    };

    if let Some(list) = object.as_list() {
        let size = list.len();
        return ReturnValue::List {
            id: registry.put_new(object),
            size,
        };
    }

    if let Some(map) = object.as_map() {
        let size = map.len();
        return ReturnValue::Map {
            id: registry.put_new(object),
            size,
        };
    }

    if let Some(array) = object.as_array() {
        let length = array.len();
        return ReturnValue::Array {
            id: registry.put_new(object),
            length,
        };
    }

    if let Some(set) = object.as_set() {
        let size = set.len();
        return ReturnValue::Set {
            id: registry.put_new(object),
            size,
        };
    }

    if object.as_iterator().is_some() {
        return ReturnValue::Iterator {
            id: registry.put_new(object),
        };
    }

    ReturnValue::Reference(registry.put_new(object))
}
