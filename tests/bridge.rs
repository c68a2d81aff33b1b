use std::{any::Any, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, ensure};

use bridge_server::{
    config::Config,
    pool::{CallbackClient, CallbackOptions},
    server,
};
use service::{
    BridgeError, Gateway, GatewayOptions,
    objects::{HostIterator, HostList, HostObject, HostValue},
    reflect::{ClassBinding, ClassRegistry, ParamKind, downcast},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};

#[derive(Default)]
struct TextBuffer(parking_lot::Mutex<String>);

impl HostObject for TextBuffer {
    fn type_name(&self) -> &str {
        "demo.TextBuffer"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn demo_classes() -> ClassRegistry {
    let registry = ClassRegistry::with_builtins();
    registry.register(
        ClassBinding::new("demo.TextBuffer")
            .constructor(&[], |_| Ok(HostValue::object(TextBuffer::default())))
            .method("append", &[ParamKind::Str], |object, mut args| {
                let buffer: &TextBuffer = downcast(object)?;
                if let HostValue::Str(text) = args.remove(0) {
                    buffer.0.lock().push_str(&text);
                }

                Ok(HostValue::Object(object.clone()))
            })
            .method("toString", &[], |object, _| {
                let buffer: &TextBuffer = downcast(object)?;
                Ok(HostValue::Str(buffer.0.lock().clone()))
            })
            .method("nothing", &[], |_, _| Ok(HostValue::Null))
            .method("chars", &[], |object, _| {
                let buffer: &TextBuffer = downcast(object)?;
                let chars: Vec<HostValue> =
                    buffer.0.lock().chars().map(HostValue::Char).collect();
                Ok(HostValue::object(HostIterator::from_values(chars)))
            })
            .method("words", &[], |object, _| {
                let buffer: &TextBuffer = downcast(object)?;
                let words: Vec<HostValue> = buffer
                    .0
                    .lock()
                    .split_whitespace()
                    .map(HostValue::from)
                    .collect();
                Ok(HostValue::object(HostList::new(words)))
            })
            .method("fail", &[], |_, _| {
                Err(BridgeError::Invocation("buffer exploded".to_string()))
            }),
    );

    registry
}

async fn start_gateway(auth_token: Option<&str>) -> Result<(SocketAddr, Arc<Gateway<ClassRegistry>>)> {
    let mut config = Config::default();
    config.server.listen = "127.0.0.1:0".parse()?;
    config.auth.token = auth_token.map(str::to_string);

    let gateway = Arc::new(Gateway::new(GatewayOptions {
        reflection: demo_classes(),
        entry_point: None,
    }));

    gateway.startup();
    let address = server::start(&Arc::new(config), &gateway).await?;
    Ok((address, gateway))
}

/// Drives the wire protocol the way a peer library would.
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn connect(address: SocketAddr) -> Result<Self> {
        let (reader, writer) = TcpStream::connect(address).await?.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn write_lines(&mut self, lines: &[&str]) -> Result<()> {
        let mut request = String::new();
        for line in lines {
            request.push_str(line);
            request.push('\n');
        }

        request.push_str("e\n");
        self.writer.write_all(request.as_bytes()).await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let count = timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await??;
        if count == 0 {
            return Ok(None);
        }

        while line.ends_with(['\n', '\r']) {
            line.pop();
        }

        Ok(Some(line))
    }

    async fn send(&mut self, lines: &[&str]) -> Result<String> {
        self.write_lines(lines).await?;
        self.read_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))
    }
}

#[tokio::test]
async fn test_constructor_and_calls() -> Result<()> {
    let (address, _gateway) = start_gateway(None).await?;
    let mut peer = Peer::connect(address).await?;

    let reply = peer.send(&["c", "constructor", "demo.TextBuffer"]).await?;
    ensure!(reply == "yro0");

    // The receiver comes back classified under a fresh id.
    let reply = peer.send(&["c", "call", "append", "o0", "shi"]).await?;
    ensure!(reply == "yro1");

    let reply = peer.send(&["c", "call", "toString", "o0"]).await?;
    ensure!(reply == "yshi");

    // Null return.
    let reply = peer.send(&["c", "call", "nothing", "o0"]).await?;
    ensure!(reply == "yn");

    Ok(())
}

#[tokio::test]
async fn test_released_ids_are_gone() -> Result<()> {
    let (address, _gateway) = start_gateway(None).await?;
    let mut peer = Peer::connect(address).await?;

    ensure!(peer.send(&["c", "constructor", "demo.TextBuffer"]).await? == "yro0");
    ensure!(peer.send(&["m", "attach", "o0"]).await? == "yrv");
    ensure!(peer.send(&["m", "release", "o0"]).await? == "yrv");

    // Releasing again stays silent, per single-ownership semantics.
    ensure!(peer.send(&["m", "release", "o0"]).await? == "yrv");
    ensure!(peer.send(&["m", "attach", "o0"]).await? == "!o");
    ensure!(peer.send(&["c", "call", "toString", "o0"]).await? == "!o");

    Ok(())
}

#[tokio::test]
async fn test_iterator_has_no_size() -> Result<()> {
    let (address, _gateway) = start_gateway(None).await?;
    let mut peer = Peer::connect(address).await?;

    ensure!(peer.send(&["c", "constructor", "demo.TextBuffer"]).await? == "yro0");
    ensure!(peer.send(&["c", "call", "append", "o0", "sone two"]).await? == "yro1");

    // A list returns with its size snapshot, an iterator without.
    let reply = peer.send(&["c", "call", "words", "o0"]).await?;
    ensure!(reply == "ylo2,2");

    let reply = peer.send(&["c", "call", "chars", "o0"]).await?;
    ensure!(reply == "yuo3");

    Ok(())
}

#[tokio::test]
async fn test_container_commands() -> Result<()> {
    let (address, _gateway) = start_gateway(None).await?;
    let mut peer = Peer::connect(address).await?;

    ensure!(peer.send(&["c", "constructor", "bridge.List"]).await? == "ylo0,0");
    ensure!(peer.send(&["l", "append", "o0", "i7"]).await? == "yrv");
    ensure!(peer.send(&["l", "append", "o0", "sx"]).await? == "yrv");
    ensure!(peer.send(&["l", "size", "o0"]).await? == "yi2");
    ensure!(peer.send(&["l", "get", "o0", "i0"]).await? == "yi7");
    ensure!(peer.send(&["l", "contains", "o0", "sx"]).await? == "yt");
    ensure!(peer.send(&["l", "set", "o0", "i1", "sy"]).await? == "yrv");
    ensure!(peer.send(&["l", "get", "o0", "i1"]).await? == "ysy");
    ensure!(peer.send(&["l", "slice", "o0", "i0", "i1"]).await? == "ylo1,1");

    // Out of range is a protocol error, not a crash.
    let reply = peer.send(&["l", "get", "o0", "i9"]).await?;
    ensure!(reply.starts_with("!p"));

    ensure!(peer.send(&["c", "constructor", "bridge.Map"]).await? == "yao2,0");
    ensure!(peer.send(&["d", "put", "o2", "sname", "sada"]).await? == "yrv");
    ensure!(peer.send(&["d", "get", "o2", "sname"]).await? == "ysada");
    ensure!(peer.send(&["d", "contains", "o2", "sname"]).await? == "yt");
    ensure!(peer.send(&["d", "get", "o2", "smissing"]).await? == "yn");
    ensure!(peer.send(&["d", "keys", "o2"]).await? == "ylo3,1");

    ensure!(peer.send(&["c", "constructor", "bridge.Set"]).await? == "yho4,0");
    ensure!(peer.send(&["s", "add", "o4", "i1"]).await? == "yt");
    ensure!(peer.send(&["s", "add", "o4", "i1"]).await? == "yf");
    ensure!(peer.send(&["s", "contains", "o4", "i1"]).await? == "yt");
    ensure!(peer.send(&["s", "size", "o4"]).await? == "yi1");

    ensure!(peer.send(&["c", "constructor", "bridge.Array", "i3"]).await? == "yAo5,3");
    ensure!(peer.send(&["a", "set", "o5", "i0", "st"]).await? == "yrv");
    ensure!(peer.send(&["a", "get", "o5", "i0"]).await? == "yst");
    ensure!(peer.send(&["a", "get", "o5", "i1"]).await? == "yn");
    ensure!(peer.send(&["a", "len", "o5"]).await? == "yi3");
    ensure!(peer.send(&["a", "set", "o5", "i3", "sx"]).await?.starts_with("!p"));

    Ok(())
}

#[tokio::test]
async fn test_exceptions_are_inspectable() -> Result<()> {
    let (address, _gateway) = start_gateway(None).await?;
    let mut peer = Peer::connect(address).await?;

    ensure!(peer.send(&["c", "constructor", "demo.TextBuffer"]).await? == "yro0");

    let reply = peer.send(&["c", "call", "fail", "o0"]).await?;
    let id = reply
        .strip_prefix("!x")
        .ok_or_else(|| anyhow::anyhow!("expected a bound exception, got {reply}"))?
        .to_string();

    // The same throwable is served by the exception command.
    let reply = peer.send(&["x", "get"]).await?;
    ensure!(reply == format!("yr{}", id));

    // And it answers inspection calls.
    let reply = peer
        .send(&["c", "call", "getMessage", id.as_str()])
        .await?;
    ensure!(reply == "ysbuffer exploded");

    Ok(())
}

#[tokio::test]
async fn test_views_and_reflection() -> Result<()> {
    let (address, _gateway) = start_gateway(None).await?;
    let mut peer = Peer::connect(address).await?;

    // Import into the default view, then construct by bare name.
    ensure!(peer.send(&["j", "import", "j", "demo.*"]).await? == "yrv");
    ensure!(peer.send(&["c", "constructor", "TextBuffer"]).await? == "yro0");

    ensure!(peer.send(&["r", "unknown", "TextBuffer", "j"]).await? == "ykdemo.TextBuffer");
    ensure!(peer.send(&["r", "unknown", "demo", "j"]).await? == "ygdemo");
    ensure!(peer.send(&["r", "unknown", "Nope", "j"]).await?.starts_with("!p"));

    // A private view does not see the import.
    let reply = peer.send(&["j", "create", "scratch"]).await?;
    let view_id = reply
        .strip_prefix("yr")
        .ok_or_else(|| anyhow::anyhow!("expected a view id, got {reply}"))?
        .to_string();
    ensure!(
        peer.send(&["r", "unknown", "TextBuffer", view_id.as_str()])
            .await?
            .starts_with("!p")
    );

    // Member listing over an instance and the help page.
    let reply = peer.send(&["r", "dir", "o0"]).await?;
    ensure!(reply.starts_with("yl"));

    let reply = peer.send(&["h", "class", "demo.TextBuffer"]).await?;
    ensure!(reply.starts_with("ysHelp on demo.TextBuffer"));
    ensure!(reply.contains("append(string)"));

    Ok(())
}

#[tokio::test]
async fn test_stream_round_trip() -> Result<()> {
    let (address, _gateway) = start_gateway(None).await?;
    let mut peer = Peer::connect(address).await?;

    ensure!(peer.send(&["c", "constructor", "bridge.Blob"]).await? == "yro0");

    // Write five raw bytes after the framed body.
    peer.write_lines(&["b", "write", "o0", "l5"]).await?;
    peer.writer.write_all(b"hello").await?;
    ensure!(peer.read_line().await? == Some("yrv".to_string()));

    // Read them back: the envelope carries the count, the bytes follow.
    let reply = peer.send(&["b", "read", "o0", "l16"]).await?;
    ensure!(reply == "yl5");

    let mut data = vec![0; 5];
    timeout(Duration::from_secs(5), peer.reader.read_exact(&mut data)).await??;
    ensure!(data == b"hello");

    Ok(())
}

#[tokio::test]
async fn test_nested_callback_reentrancy() -> Result<()> {
    let (address, _gateway) = start_gateway(None).await?;
    let mut peer = Peer::connect(address).await?;

    // Hand the host a peer-owned callable and read it back as a bound
    // reference.
    ensure!(peer.send(&["c", "constructor", "bridge.List"]).await? == "ylo0,0");
    ensure!(peer.send(&["l", "append", "o0", "p42"]).await? == "yrv");
    ensure!(peer.send(&["l", "get", "o0", "i0"]).await? == "yro1");

    // Invoking the proxy routes a call command back to us on this very
    // socket.
    peer.write_lines(&["c", "call", "greet", "o1", "sWorld"]).await?;

    ensure!(peer.read_line().await? == Some("c".to_string()));
    ensure!(peer.read_line().await? == Some("call".to_string()));
    ensure!(peer.read_line().await? == Some("greet".to_string()));
    ensure!(peer.read_line().await? == Some("42".to_string()));
    ensure!(peer.read_line().await? == Some("sWorld".to_string()));
    ensure!(peer.read_line().await? == Some("e".to_string()));

    // Before replying, issue a nested command of our own; the host must
    // answer it first, in order.
    peer.write_lines(&["l", "size", "o0"]).await?;
    ensure!(peer.read_line().await? == Some("yi1".to_string()));

    // Now the callback reply; the host folds it into the original
    // response.
    peer.writer.write_all(b"ysHello World\n").await?;
    ensure!(peer.read_line().await? == Some("ysHello World".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_auth_preamble() -> Result<()> {
    let (address, _gateway) = start_gateway(Some("sesame")).await?;

    // Anything before auth is refused and the connection is dropped.
    let mut peer = Peer::connect(address).await?;
    let reply = peer.send(&["c", "constructor", "demo.TextBuffer"]).await?;
    ensure!(reply.starts_with("!p"));
    ensure!(peer.read_line().await? == None);

    // A wrong token is refused the same way.
    let mut peer = Peer::connect(address).await?;
    ensure!(peer.send(&["A", "sguess"]).await?.starts_with("!p"));
    ensure!(peer.read_line().await? == None);

    // The right token opens the gate.
    let mut peer = Peer::connect(address).await?;
    ensure!(peer.send(&["A", "ssesame"]).await? == "yrv");
    ensure!(peer.send(&["c", "constructor", "demo.TextBuffer"]).await? == "yro0");

    Ok(())
}

#[tokio::test]
async fn test_shutdown_command() -> Result<()> {
    let (address, _gateway) = start_gateway(None).await?;
    let mut peer = Peer::connect(address).await?;

    ensure!(peer.send(&["c", "constructor", "demo.TextBuffer"]).await? == "yro0");

    // Shutdown has no body and no reply; the socket just closes.
    peer.writer.write_all(b"q\n").await?;
    ensure!(peer.read_line().await? == None);

    Ok(())
}

/// A scripted callback server standing in for the peer side.
async fn fake_callback_server(replies: usize) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        for _ in 0..replies {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };

            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();

            // One command per connection: consume it, answer, drop the
            // socket so the parked connection goes stale.
            while let Ok(Some(line)) = lines.next_line().await {
                if line == "e" {
                    let _ = writer.write_all(b"yrv\n").await;
                    break;
                }
            }
        }
    });

    Ok((address, handle))
}

#[tokio::test]
async fn test_callback_pool_retries_stale_sockets() -> Result<()> {
    let (_, gateway) = start_gateway(None).await?;
    let (endpoint, _server) = fake_callback_server(2).await?;

    let client = CallbackClient::new(
        gateway,
        CallbackOptions {
            endpoint,
            pool_size: 4,
            auth_token: None,
            reply_timeout: Duration::from_millis(500),
        },
    );

    // First round trip succeeds and parks the socket, which the fake
    // peer then closes.
    ensure!(client.send_command("c\ncall\nnotify\np1\ne\n").await? == "yrv");

    // The parked socket is stale; the client must retry once on a
    // fresh connection and succeed.
    ensure!(client.send_command("c\ncall\nnotify\np1\ne\n").await? == "yrv");

    client.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_empty_reply_is_a_network_error() -> Result<()> {
    let (_, gateway) = start_gateway(None).await?;

    // A peer that accepts and closes without sending a byte.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };

            drop(stream);
        }
    });

    let client = CallbackClient::new(
        gateway,
        CallbackOptions {
            endpoint,
            pool_size: 4,
            auth_token: None,
            reply_timeout: Duration::from_millis(500),
        },
    );

    let result = client.send_command("c\ncall\nnotify\np1\ne\n").await;
    ensure!(matches!(result, Err(BridgeError::Network(_))));

    Ok(())
}
