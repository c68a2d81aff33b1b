use anyhow::Result;
use bridge_server_codec::{Error, ErrorKind, ReturnValue, Token, escape, is_static_id, unescape};

#[test]
fn test_token_round_trips() -> Result<()> {
    let cases = [
        ("n", Token::Null),
        ("t", Token::Bool(true)),
        ("f", Token::Bool(false)),
        ("i42", Token::Int(42)),
        ("i-7", Token::Int(-7)),
        ("l9223372036854775807", Token::Long(i64::MAX)),
        ("cA", Token::Char('A')),
        ("shi", Token::Str("hi".to_string())),
        ("jAQID", Token::Bytes(vec![1, 2, 3])),
        ("D-3.14", Token::Decimal("-3.14".to_string())),
        ("ro12", Token::Reference("o12".to_string())),
        ("rz:java.lang.Math", Token::Reference("z:java.lang.Math".to_string())),
        ("po3", Token::Proxy("o3".to_string())),
    ];

    for (line, token) in cases {
        assert_eq!(Token::decode(line)?, token);
        assert_eq!(token.encode(), line);
    }

    // The long form booleans decode but are never emitted.
    assert_eq!(Token::decode("bTrue")?, Token::Bool(true));
    assert_eq!(Token::decode("bFalse")?, Token::Bool(false));
    assert_eq!(Token::decode("d2.5")?, Token::Double(2.5));
    assert_eq!(Token::Double(2.5).encode(), "d2.5");

    Ok(())
}

#[test]
fn test_string_escaping() {
    assert_eq!(escape("a\nb\rc\\d"), "a\\nb\\rc\\\\d");
    assert_eq!(unescape("a\\nb\\rc\\\\d"), "a\nb\rc\\d");

    // Lenient on malformed escapes.
    assert_eq!(unescape("tail\\"), "tail\\");
    assert_eq!(unescape("\\q"), "\\q");

    let token = Token::Str("line one\nline two".to_string());
    assert_eq!(token.encode(), "sline one\\nline two");
    assert_eq!(Token::decode(&token.encode()).unwrap(), token);
}

#[test]
fn test_token_rejections() {
    assert_eq!(Token::decode(""), Err(Error::EmptyLine));
    assert_eq!(Token::decode("Zoo"), Err(Error::UnknownTag('Z')));
    assert_eq!(Token::decode("i99999999999"), Err(Error::IntegerOverflow));
    assert_eq!(
        Token::decode("l99999999999999999999"),
        Err(Error::IntegerOverflow)
    );
    assert_eq!(Token::decode("iabc"), Err(Error::BadNumber));
    assert_eq!(Token::decode("bMaybe"), Err(Error::BadBoolean));
    assert_eq!(Token::decode("cab"), Err(Error::BadCharacter));
    assert_eq!(Token::decode("c"), Err(Error::BadCharacter));
    assert_eq!(Token::decode("j!!!"), Err(Error::BadBase64));
    assert_eq!(Token::decode("D1.2.3"), Err(Error::BadDecimal));
    assert_eq!(Token::decode("Dx"), Err(Error::BadDecimal));
    assert_eq!(Token::decode("r"), Err(Error::BadReference));
}

#[test]
fn test_envelope_round_trips() -> Result<()> {
    let cases = [
        ("yn", ReturnValue::Null),
        ("yrv", ReturnValue::Void),
        ("yro0", ReturnValue::Reference("o0".to_string())),
        ("yshi", ReturnValue::Primitive(Token::Str("hi".to_string()))),
        ("yi5", ReturnValue::Primitive(Token::Int(5))),
        ("yl77", ReturnValue::Primitive(Token::Long(77))),
        ("yt", ReturnValue::Primitive(Token::Bool(true))),
        (
            "ylo4,3",
            ReturnValue::List {
                id: "o4".to_string(),
                size: 3,
            },
        ),
        (
            "yao5,2",
            ReturnValue::Map {
                id: "o5".to_string(),
                size: 2,
            },
        ),
        (
            "yho6,0",
            ReturnValue::Set {
                id: "o6".to_string(),
                size: 0,
            },
        ),
        (
            "yAo7,16",
            ReturnValue::Array {
                id: "o7".to_string(),
                length: 16,
            },
        ),
        (
            "yuo8",
            ReturnValue::Iterator {
                id: "o8".to_string(),
            },
        ),
        ("ykjava.lang.Math", ReturnValue::Class("java.lang.Math".to_string())),
        ("ygjava.lang", ReturnValue::Package("java.lang".to_string())),
        ("!xo9", ReturnValue::exception("o9")),
        ("!x", ReturnValue::Error(ErrorKind::Exception(None))),
        ("!o", ReturnValue::OBJECT_NOT_FOUND),
        ("!pbad index", ReturnValue::protocol_error("bad index")),
    ];

    for (line, value) in cases {
        assert_eq!(value.encode(), line);
        assert_eq!(ReturnValue::decode(line)?, value);
    }

    // `rn` is an accepted null spelling on decode only.
    assert_eq!(ReturnValue::decode("yrn")?, ReturnValue::Null);

    Ok(())
}

#[test]
fn test_envelope_rejections() {
    assert_eq!(ReturnValue::decode(""), Err(Error::EmptyLine));
    assert_eq!(ReturnValue::decode("zro0"), Err(Error::BadEnvelope));
    assert_eq!(ReturnValue::decode("y"), Err(Error::BadEnvelope));
    assert_eq!(ReturnValue::decode("!"), Err(Error::BadEnvelope));
    assert_eq!(ReturnValue::decode("!z"), Err(Error::BadEnvelope));
    assert_eq!(ReturnValue::decode("yr"), Err(Error::BadReference));
    assert_eq!(ReturnValue::decode("ylo4"), Err(Error::BadEnvelope));
    assert_eq!(ReturnValue::decode("yAo4,many"), Err(Error::BadEnvelope));
}

#[test]
fn test_static_ids() {
    assert!(is_static_id("z:java.lang.Math"));
    assert!(!is_static_id("o3"));
    assert!(!is_static_id("t"));
}
