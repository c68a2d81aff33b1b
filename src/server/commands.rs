//! Command handlers.
//!
//! One function per command group. Handlers parse their argument lines
//! from the already framed body and produce the single response
//! envelope; failures bubble up as [`BridgeError`] and the dispatcher
//! folds them into error envelopes, binding throwables first.

use std::sync::Arc;

use codec::{ErrorKind, ReturnValue, Token, command};
use service::{
    BridgeError, Gateway,
    objects::{HostArray, HostList, HostValue, ObjectRef, PeerProxy},
    reflect::{CallTarget, Reflection},
    views::View,
};

use crate::server::{
    connection::{ConnectionIo, send_command_io},
    dispatch::{Body, ConnState, DispatchContext, Reply},
};

fn unknown_subcommand(sub: &str) -> BridgeError {
    BridgeError::Protocol(format!("unknown subcommand: {}", sub))
}

fn not_a(id: &str, kind: &str) -> BridgeError {
    BridgeError::Protocol(format!("{} is not a {}", id, kind))
}

fn out_of_range(index: usize) -> BridgeError {
    BridgeError::Protocol(format!("index out of range: {}", index))
}

fn registered<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    id: &str,
) -> Result<ObjectRef, BridgeError> {
    gateway
        .get_object(id)
        .ok_or_else(|| BridgeError::UnknownObject(id.to_string()))
}

fn resolve_args<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<Vec<HostValue>, BridgeError> {
    body.rest_tokens()?
        .into_iter()
        .map(|token| gateway.resolve_token(token))
        .collect()
}

fn with_view<R: Reflection, T>(
    gateway: &Arc<Gateway<R>>,
    id: &str,
    handle: impl FnOnce(&View) -> T,
) -> Result<T, BridgeError> {
    let object = registered(gateway, id)?;
    match object.as_any().downcast_ref::<View>() {
        Some(view) => Ok(handle(view)),
        None => Err(not_a(id, "view")),
    }
}

/// Shared token auth. Only ever dispatched while the connection is not
/// yet authenticated.
pub fn auth(state: &mut ConnState, expected: &str, body: &mut Body) -> ReturnValue {
    match body.next_token() {
        Ok(Token::Str(token)) if token == expected => {
            state.authenticated = true;
            ReturnValue::Void
        }
        _ => ReturnValue::protocol_error("authentication failed"),
    }
}

/// Method calls and constructor invocations. Calls whose receiver is a
/// peer proxy route back over this same connection, which keeps nested
/// calls on the peer-side call stack that is waiting here.
pub async fn core<R: Reflection>(
    io: &mut ConnectionIo,
    ctx: &mut DispatchContext<'_, R>,
    body: &mut Body,
) -> Result<Reply, BridgeError> {
    let sub = body.next_line()?;
    let envelope = match sub.as_str() {
        command::core::CALL => {
            let method = body.next_line()?;
            let target_id = body.next_line()?;
            let args = resolve_args(ctx.gateway, body)?;
            let target = ctx.gateway.resolve_target(&target_id)?;

            let proxy_id = match &target {
                CallTarget::Instance(object) => object.as_proxy().map(|proxy| proxy.id.clone()),
                CallTarget::Static(_) => None,
            };

            match proxy_id {
                Some(proxy_id) => call_proxy(io, ctx, &proxy_id, &method, args).await?,
                None => ctx.gateway.invoke_on(&method, &target, args),
            }
        }
        command::core::CONSTRUCTOR => {
            let class = body.next_line()?;
            let args = resolve_args(ctx.gateway, body)?;
            ctx.gateway.invoke_constructor(&class, args)
        }
        _ => return Err(unknown_subcommand(&sub)),
    };

    Ok(Reply::Line(envelope))
}

async fn call_proxy<R: Reflection>(
    io: &mut ConnectionIo,
    ctx: &mut DispatchContext<'_, R>,
    proxy_id: &str,
    method: &str,
    args: Vec<HostValue>,
) -> Result<ReturnValue, BridgeError> {
    let mut cmd = format!(
        "{}\n{}\n{}\n{}\n",
        command::CORE,
        command::core::CALL,
        method,
        proxy_id
    );

    for value in args {
        cmd.push_str(&ctx.gateway.value_to_token(value).encode());
        cmd.push('\n');
    }

    cmd.push_str(command::END);
    cmd.push('\n');

    let reply = send_command_io(io, ctx, &cmd, true).await?;
    let envelope = ReturnValue::decode(&reply)
        .map_err(|e| BridgeError::Protocol(format!("bad peer reply: {}", e)))?;

    let value = peer_value(envelope)?;
    Ok(ctx.gateway.classify(value))
}

/// Converts the peer's reply envelope into a host value. Ids inside the
/// envelope are peer-side ids, so anything retained over there comes
/// back wrapped as a proxy.
fn peer_value(envelope: ReturnValue) -> Result<HostValue, BridgeError> {
    Ok(match envelope {
        ReturnValue::Null => HostValue::Null,
        ReturnValue::Void => HostValue::Void,
        ReturnValue::Primitive(token) => match token {
            Token::Null => HostValue::Null,
            Token::Bool(value) => HostValue::Bool(value),
            Token::Int(value) => HostValue::Int(value),
            Token::Long(value) => HostValue::Long(value),
            Token::Double(value) => HostValue::Double(value),
            Token::Char(value) => HostValue::Char(value),
            Token::Str(value) => HostValue::Str(value),
            Token::Bytes(value) => HostValue::Bytes(value),
            Token::Decimal(value) => HostValue::Decimal(value),
            Token::Reference(id) | Token::Proxy(id) => {
                HostValue::Object(Arc::new(PeerProxy::new(id)))
            }
        },
        ReturnValue::Reference(id)
        | ReturnValue::List { id, .. }
        | ReturnValue::Map { id, .. }
        | ReturnValue::Set { id, .. }
        | ReturnValue::Array { id, .. }
        | ReturnValue::Iterator { id } => HostValue::Object(Arc::new(PeerProxy::new(id))),
        ReturnValue::Class(name) | ReturnValue::Package(name) => HostValue::Str(name),
        ReturnValue::Error(ErrorKind::Exception(Some(id))) => {
            return Err(BridgeError::Invocation(format!(
                "peer raised an exception: {}",
                id
            )));
        }
        ReturnValue::Error(ErrorKind::Exception(None)) => {
            return Err(BridgeError::Invocation("peer raised an exception".to_string()));
        }
        ReturnValue::Error(ErrorKind::ObjectNotFound) => {
            return Err(BridgeError::Invocation(
                "peer reported an unknown object".to_string(),
            ));
        }
        ReturnValue::Error(ErrorKind::Protocol(message)) => {
            return Err(BridgeError::Invocation(format!(
                "peer rejected the call: {}",
                message.unwrap_or_default()
            )));
        }
    })
}

pub fn field<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    match sub.as_str() {
        command::field::GET => {
            let target_id = body.next_line()?;
            let name = body.next_line()?;
            Ok(gateway.get_field(&target_id, &name))
        }
        command::field::SET => {
            let target_id = body.next_line()?;
            let name = body.next_line()?;
            let value = gateway.resolve_token(body.next_token()?)?;
            Ok(gateway.set_field(&target_id, &name, value))
        }
        _ => Err(unknown_subcommand(&sub)),
    }
}

pub fn list<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    let id = body.next_line()?;
    let object = registered(gateway, &id)?;
    let list = object.as_list().ok_or_else(|| not_a(&id, "list"))?;

    Ok(match sub.as_str() {
        command::list::GET => {
            let index = body.next_index()?;
            let value = list.get(index).ok_or_else(|| out_of_range(index))?;
            gateway.classify(value)
        }
        command::list::SET => {
            let index = body.next_index()?;
            let value = gateway.resolve_token(body.next_token()?)?;
            if !list.set(index, value) {
                return Err(out_of_range(index));
            }

            ReturnValue::Void
        }
        command::list::SIZE => ReturnValue::Primitive(Token::Int(list.len() as i32)),
        command::list::APPEND => {
            let value = gateway.resolve_token(body.next_token()?)?;
            list.append(value);
            ReturnValue::Void
        }
        command::list::SLICE => {
            let from = body.next_index()?;
            let to = body.next_index()?;
            let items = list
                .slice(from, to)
                .ok_or_else(|| BridgeError::Protocol(format!("bad slice: {}..{}", from, to)))?;
            gateway.classify(HostValue::object(HostList::new(items)))
        }
        command::list::CONTAINS => {
            let value = gateway.resolve_token(body.next_token()?)?;
            ReturnValue::Primitive(Token::Bool(list.contains(&value)))
        }
        command::list::REMOVE => {
            let index = body.next_index()?;
            list.remove(index).ok_or_else(|| out_of_range(index))?;
            ReturnValue::Void
        }
        _ => return Err(unknown_subcommand(&sub)),
    })
}

pub fn array<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    let id = body.next_line()?;
    let object = registered(gateway, &id)?;
    let array = object.as_array().ok_or_else(|| not_a(&id, "array"))?;

    Ok(match sub.as_str() {
        command::array::GET => {
            let index = body.next_index()?;
            let value = array.get(index).ok_or_else(|| out_of_range(index))?;
            gateway.classify(value)
        }
        command::array::SET => {
            let index = body.next_index()?;
            let value = gateway.resolve_token(body.next_token()?)?;
            if !array.set(index, value) {
                return Err(out_of_range(index));
            }

            ReturnValue::Void
        }
        command::array::LEN => ReturnValue::Primitive(Token::Int(array.len() as i32)),
        command::array::SLICE => {
            let from = body.next_index()?;
            let to = body.next_index()?;
            let items = array
                .slice(from, to)
                .ok_or_else(|| BridgeError::Protocol(format!("bad slice: {}..{}", from, to)))?;
            gateway.classify(HostValue::object(HostArray::new(items)))
        }
        _ => return Err(unknown_subcommand(&sub)),
    })
}

pub fn map<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    let id = body.next_line()?;
    let object = registered(gateway, &id)?;
    let map = object.as_map().ok_or_else(|| not_a(&id, "map"))?;

    Ok(match sub.as_str() {
        command::map::GET => {
            let key = gateway.resolve_token(body.next_token()?)?;
            match map.get(&key) {
                Some(value) => gateway.classify(value),
                None => ReturnValue::Null,
            }
        }
        command::map::PUT => {
            let key = gateway.resolve_token(body.next_token()?)?;
            let value = gateway.resolve_token(body.next_token()?)?;
            map.put(key, value);
            ReturnValue::Void
        }
        command::map::REMOVE => {
            let key = gateway.resolve_token(body.next_token()?)?;
            map.remove(&key);
            ReturnValue::Void
        }
        command::map::SIZE => ReturnValue::Primitive(Token::Int(map.len() as i32)),
        command::map::CONTAINS => {
            let key = gateway.resolve_token(body.next_token()?)?;
            ReturnValue::Primitive(Token::Bool(map.contains_key(&key)))
        }
        command::map::KEYS => gateway.classify(HostValue::object(HostList::new(map.keys()))),
        _ => return Err(unknown_subcommand(&sub)),
    })
}

pub fn set<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    let id = body.next_line()?;
    let object = registered(gateway, &id)?;
    let set = object.as_set().ok_or_else(|| not_a(&id, "set"))?;

    Ok(match sub.as_str() {
        command::set::ADD => {
            let value = gateway.resolve_token(body.next_token()?)?;
            ReturnValue::Primitive(Token::Bool(set.add(value)))
        }
        command::set::REMOVE => {
            let value = gateway.resolve_token(body.next_token()?)?;
            ReturnValue::Primitive(Token::Bool(set.remove(&value)))
        }
        command::set::CONTAINS => {
            let value = gateway.resolve_token(body.next_token()?)?;
            ReturnValue::Primitive(Token::Bool(set.contains(&value)))
        }
        command::set::SIZE => ReturnValue::Primitive(Token::Int(set.len() as i32)),
        _ => return Err(unknown_subcommand(&sub)),
    })
}

/// Registry lifetime management. Release is always a success, even for
/// ids that were never bound; attach only confirms the binding exists,
/// bindings are single-owner and carry no reference count.
pub fn memory<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    let id = body.next_line()?;
    match sub.as_str() {
        command::memory::RELEASE => {
            gateway.delete_object(&id);
            Ok(ReturnValue::Void)
        }
        command::memory::ATTACH => {
            gateway.resolve_target(&id)?;
            Ok(ReturnValue::Void)
        }
        _ => Err(unknown_subcommand(&sub)),
    }
}

pub fn view<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    match sub.as_str() {
        command::view::CREATE => {
            let name = body.next_line()?;
            let id = gateway.put_new_object(Arc::new(View::new(name)));
            Ok(ReturnValue::Reference(id))
        }
        command::view::IMPORT => {
            let view_id = body.next_line()?;
            let import = body.next_line()?;
            with_view(gateway, &view_id, |view| view.add_import(&import))?;
            Ok(ReturnValue::Void)
        }
        command::view::REMOVE_IMPORT => {
            let view_id = body.next_line()?;
            let import = body.next_line()?;
            let removed = with_view(gateway, &view_id, |view| view.remove_import(&import))?;
            Ok(ReturnValue::Primitive(Token::Bool(removed)))
        }
        _ => Err(unknown_subcommand(&sub)),
    }
}

pub fn reflection<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    match sub.as_str() {
        command::reflection::UNKNOWN => {
            let name = body.next_line()?;
            let view_id = body.next_line()?;

            if gateway.reflection().class_exists(&name) {
                return Ok(ReturnValue::Class(name));
            }

            let resolved = with_view(gateway, &view_id, |view| {
                view.resolve(&name, &|fqn| gateway.reflection().class_exists(fqn))
            })?;

            if let Some(fqn) = resolved {
                return Ok(ReturnValue::Class(fqn));
            }

            if gateway.reflection().package_exists(&name) {
                return Ok(ReturnValue::Package(name));
            }

            Err(BridgeError::Protocol(format!(
                "cannot resolve name: {}",
                name
            )))
        }
        command::reflection::DIR => {
            let target = body.next_line()?;
            let members = if let Ok(target) = gateway.resolve_target(&target) {
                gateway.reflection().members(&target)?
            } else if let Some(fqn) = gateway.resolve_class_name(&target) {
                gateway.reflection().members(&CallTarget::Static(fqn))?
            } else if gateway.reflection().package_exists(&target) {
                gateway.reflection().package_members(&target)
            } else {
                return Err(BridgeError::Protocol(format!(
                    "cannot resolve name: {}",
                    target
                )));
            };

            let members = members.into_iter().map(HostValue::Str).collect();
            Ok(gateway.classify(HostValue::object(HostList::new(members))))
        }
        _ => Err(unknown_subcommand(&sub)),
    }
}

pub fn help<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    let target = match sub.as_str() {
        command::help::OBJECT => {
            let id = body.next_line()?;
            gateway.resolve_target(&id)?
        }
        command::help::CLASS => {
            let name = body.next_line()?;
            let fqn = gateway
                .resolve_class_name(&name)
                .ok_or_else(|| BridgeError::Reflection(format!("unknown class: {}", name)))?;
            CallTarget::Static(fqn)
        }
        _ => return Err(unknown_subcommand(&sub)),
    };

    let page = gateway.reflection().describe(&target)?;
    Ok(ReturnValue::Primitive(Token::Str(page)))
}

/// Blob transfer. The read reply is the only response that spans more
/// than one line on the wire: the envelope carries the byte count and
/// the raw bytes follow it.
pub async fn stream<R: Reflection>(
    io: &mut ConnectionIo,
    gateway: &Arc<Gateway<R>>,
    body: &mut Body,
) -> Result<Reply, BridgeError> {
    let sub = body.next_line()?;
    let id = body.next_line()?;
    let count = body.next_index()?;
    let object = registered(gateway, &id)?;
    let blob = object.as_blob().ok_or_else(|| not_a(&id, "blob"))?;

    match sub.as_str() {
        command::stream::READ => {
            let data = blob.read(count);
            Ok(Reply::Raw(
                ReturnValue::Primitive(Token::Long(data.len() as i64)),
                data,
            ))
        }
        command::stream::WRITE => {
            let data = io.read_exact(count).await?;
            blob.write(&data);
            Ok(Reply::Line(ReturnValue::Void))
        }
        _ => Err(unknown_subcommand(&sub)),
    }
}

pub fn exception<R: Reflection>(
    gateway: &Arc<Gateway<R>>,
    state: &ConnState,
    body: &mut Body,
) -> Result<ReturnValue, BridgeError> {
    let sub = body.next_line()?;
    if sub != command::exception::GET {
        return Err(unknown_subcommand(&sub));
    }

    Ok(match &state.last_exception {
        Some(id) if gateway.get_object(id).is_some() => ReturnValue::Reference(id.clone()),
        _ => ReturnValue::Null,
    })
}
