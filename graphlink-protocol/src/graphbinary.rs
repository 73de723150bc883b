//! GraphBinary encode/decode.
//!
//! A fully-qualified value is `{type_code:1}{value_flag:1}{value}`; none of
//! the types implemented here carry extra type info between the code and the
//! flag. A value-only ("bare") form drops the type header, and drops the
//! flag too when the slot is non-nullable. All multi-byte scalars are
//! big-endian.

use crate::bytecode::{Bytecode, Instruction};
use crate::error::CodecError;
use crate::value::{TypeCode, Value};
use bytes::{Buf, BufMut, BytesMut};
use num_bigint::{BigInt, Sign};

pub(crate) const VALUE_FLAG_NONE: u8 = 0x00;
pub(crate) const VALUE_FLAG_NULL: u8 = 0x01;

/// Writes a value in fully-qualified form. A null writes exactly
/// `{0xFE, 0x01}`.
pub fn write_value(value: &Value, buf: &mut BytesMut) -> Result<(), CodecError> {
    if value.is_null() {
        buf.put_u8(TypeCode::Null.byte());
        buf.put_u8(VALUE_FLAG_NULL);
        return Ok(());
    }
    buf.put_u8(value.type_code().byte());
    buf.put_u8(VALUE_FLAG_NONE);
    write_body(value, buf)
}

/// Writes a typed null in fully-qualified form, `{type_code}{0x01}`.
///
/// An untyped null goes through [`write_value`] and carries the null type
/// code instead.
pub fn write_null_of(code: TypeCode, buf: &mut BytesMut) {
    buf.put_u8(code.byte());
    buf.put_u8(VALUE_FLAG_NULL);
}

/// Writes a value without its type header. The flag byte is written only
/// for nullable slots; a null in a non-nullable slot is an error.
pub fn write_value_bare(value: &Value, buf: &mut BytesMut, nullable: bool) -> Result<(), CodecError> {
    if value.is_null() {
        if !nullable {
            return Err(CodecError::UnexpectedNull);
        }
        buf.put_u8(VALUE_FLAG_NULL);
        return Ok(());
    }
    if nullable {
        buf.put_u8(VALUE_FLAG_NONE);
    }
    write_body(value, buf)
}

/// Reads a fully-qualified value.
pub fn read_value(buf: &mut impl Buf) -> Result<Value, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::MissingBuffer);
    }
    let code_byte = buf.get_u8();
    let code = TypeCode::from_byte(code_byte).ok_or(CodecError::UnknownTypeCode(code_byte))?;
    if read_flag(buf)? {
        return Ok(Value::Null);
    }
    if code == TypeCode::Null {
        // The null type admits no concrete value.
        return Err(CodecError::UnexpectedValueFlag(VALUE_FLAG_NONE));
    }
    read_body(code, buf)
}

/// Reads a fully-qualified value whose type the caller already knows.
///
/// A null decodes to `Value::Null` in a nullable slot; in a non-nullable
/// slot, numeric types decode to the zero of their width and composite
/// types still decode to `Value::Null`.
pub fn read_fq_expecting(
    buf: &mut impl Buf,
    expected: TypeCode,
    nullable: bool,
) -> Result<Value, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::MissingBuffer);
    }
    let code_byte = buf.get_u8();
    if code_byte != expected.byte() {
        return Err(CodecError::UnexpectedTypeCode {
            expected: expected.byte(),
            actual: code_byte,
        });
    }
    if read_flag(buf)? {
        if !nullable && expected.is_numeric() {
            return Ok(Value::numeric_zero(expected));
        }
        return Ok(Value::Null);
    }
    read_body(expected, buf)
}

/// Reads a value without a type header; the caller supplies the expected
/// type and nullability from context.
pub fn read_value_bare(
    buf: &mut impl Buf,
    code: TypeCode,
    nullable: bool,
) -> Result<Value, CodecError> {
    if nullable && read_flag(buf)? {
        return Ok(Value::Null);
    }
    read_body(code, buf)
}

fn read_flag(buf: &mut impl Buf) -> Result<bool, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::ValueFlagMissing);
    }
    match buf.get_u8() {
        VALUE_FLAG_NONE => Ok(false),
        VALUE_FLAG_NULL => Ok(true),
        other => Err(CodecError::UnexpectedValueFlag(other)),
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<(), CodecError> {
    let remaining = buf.remaining();
    if remaining < n {
        return Err(CodecError::BufferExhausted {
            needed: n - remaining,
            remaining,
        });
    }
    Ok(())
}

/// Reads a non-negative Int32 length, bounded by the bytes still available.
pub(crate) fn read_len(buf: &mut impl Buf) -> Result<usize, CodecError> {
    need(buf, 4)?;
    let declared = buf.get_i32();
    if declared < 0 || declared as usize > buf.remaining() {
        return Err(CodecError::UnexpectedValueLength {
            declared: i64::from(declared),
            remaining: buf.remaining(),
        });
    }
    Ok(declared as usize)
}

pub(crate) fn write_len(len: usize, buf: &mut BytesMut, target: &'static str) -> Result<(), CodecError> {
    let declared = i32::try_from(len).map_err(|_| CodecError::SerializeRange {
        value: len as i64,
        target,
    })?;
    buf.put_i32(declared);
    Ok(())
}

fn write_body(value: &Value, buf: &mut BytesMut) -> Result<(), CodecError> {
    match value {
        Value::Null => Err(CodecError::UnexpectedNull),
        Value::Bool(b) => {
            buf.put_u8(u8::from(*b));
            Ok(())
        }
        Value::Byte(b) => {
            buf.put_u8(*b);
            Ok(())
        }
        Value::Short(s) => {
            buf.put_i16(*s);
            Ok(())
        }
        Value::Int(i) => {
            buf.put_i32(*i);
            Ok(())
        }
        Value::Long(l) => {
            buf.put_i64(*l);
            Ok(())
        }
        Value::Float(f) => {
            buf.put_f32(*f);
            Ok(())
        }
        Value::Double(d) => {
            buf.put_f64(*d);
            Ok(())
        }
        Value::BigInt(n) => write_bigint(n, buf),
        Value::String(s) => put_string(s, buf),
        Value::Uuid(u) => {
            buf.put_slice(u.as_bytes());
            Ok(())
        }
        Value::List(items) => {
            write_len(items.len(), buf, "list length")?;
            for item in items {
                write_value(item, buf)?;
            }
            Ok(())
        }
        Value::Map(entries) => {
            write_len(entries.len(), buf, "map length")?;
            for (key, val) in entries {
                write_value(key, buf)?;
                write_value(val, buf)?;
            }
            Ok(())
        }
        Value::Bytecode(bc) => write_bytecode(bc, buf),
        Value::Traverser { bulk, value } => {
            buf.put_i64(*bulk);
            write_value(value, buf)
        }
    }
}

fn read_body(code: TypeCode, buf: &mut impl Buf) -> Result<Value, CodecError> {
    match code {
        // A bare read never targets the null type.
        TypeCode::Null => Err(CodecError::UnknownTypeCode(TypeCode::Null.byte())),
        TypeCode::Boolean => {
            need(buf, 1)?;
            Ok(Value::Bool(buf.get_u8() != 0))
        }
        TypeCode::Byte => {
            need(buf, 1)?;
            Ok(Value::Byte(buf.get_u8()))
        }
        TypeCode::Short => {
            need(buf, 2)?;
            Ok(Value::Short(buf.get_i16()))
        }
        TypeCode::Int => {
            need(buf, 4)?;
            Ok(Value::Int(buf.get_i32()))
        }
        TypeCode::Long => {
            need(buf, 8)?;
            Ok(Value::Long(buf.get_i64()))
        }
        TypeCode::Float => {
            need(buf, 4)?;
            Ok(Value::Float(buf.get_f32()))
        }
        TypeCode::Double => {
            need(buf, 8)?;
            Ok(Value::Double(buf.get_f64()))
        }
        TypeCode::BigInteger => {
            let len = read_len(buf)?;
            let bytes = buf.copy_to_bytes(len);
            Ok(Value::BigInt(BigInt::from_signed_bytes_be(&bytes)))
        }
        TypeCode::String => Ok(Value::String(get_string(buf)?)),
        TypeCode::Uuid => {
            need(buf, 16)?;
            let mut raw = [0u8; 16];
            buf.copy_to_slice(&mut raw);
            Ok(Value::Uuid(uuid::Uuid::from_bytes(raw)))
        }
        TypeCode::List => {
            let len = read_len(buf)?;
            let mut items = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                items.push(read_value(buf)?);
            }
            Ok(Value::List(items))
        }
        TypeCode::Map => {
            let len = read_len(buf)?;
            let mut entries: Vec<(Value, Value)> = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                let key = read_value(buf)?;
                let val = read_value(buf)?;
                // Duplicate keys: last wins.
                if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                    slot.1 = val;
                } else {
                    entries.push((key, val));
                }
            }
            Ok(Value::Map(entries))
        }
        TypeCode::Bytecode => read_bytecode(buf),
        TypeCode::Traverser => {
            need(buf, 8)?;
            let bulk = buf.get_i64();
            let value = read_value(buf)?;
            Ok(Value::Traverser {
                bulk,
                value: Box::new(value),
            })
        }
    }
}

/// `{length:Int32}{utf8 bytes}`; length counts bytes, not code points.
pub(crate) fn put_string(s: &str, buf: &mut BytesMut) -> Result<(), CodecError> {
    write_len(s.len(), buf, "string length")?;
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn get_string(buf: &mut impl Buf) -> Result<String, CodecError> {
    let len = read_len(buf)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Two's-complement signed magnitude, minimally encoded; zero is length 0.
fn write_bigint(n: &BigInt, buf: &mut BytesMut) -> Result<(), CodecError> {
    if n.sign() == Sign::NoSign {
        buf.put_i32(0);
        return Ok(());
    }
    let bytes = n.to_signed_bytes_be();
    write_len(bytes.len(), buf, "big integer length")?;
    buf.put_slice(&bytes);
    Ok(())
}

fn write_instruction_set(
    instructions: &[Instruction],
    buf: &mut BytesMut,
) -> Result<(), CodecError> {
    write_len(instructions.len(), buf, "instruction count")?;
    for instruction in instructions {
        // The operator name is a bare, non-nullable string.
        put_string(&instruction.operator, buf)?;
        write_len(instruction.arguments.len(), buf, "argument count")?;
        for argument in &instruction.arguments {
            write_value(argument, buf)?;
        }
    }
    Ok(())
}

fn read_instruction_set(buf: &mut impl Buf) -> Result<Vec<Instruction>, CodecError> {
    let count = read_len(buf)?;
    let mut instructions = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let operator = get_string(buf)?;
        let argc = read_len(buf)?;
        let mut arguments = Vec::with_capacity(argc.min(1024));
        for _ in 0..argc {
            arguments.push(read_value(buf)?);
        }
        instructions.push(Instruction {
            operator,
            arguments,
        });
    }
    Ok(instructions)
}

/// `{steps:Int32}{step_i}…{sources:Int32}{source_i}…`, each instruction
/// `{name}{argc:Int32}{arg fully-qualified}…`. Bindings are not serialized.
fn write_bytecode(bc: &Bytecode, buf: &mut BytesMut) -> Result<(), CodecError> {
    write_instruction_set(&bc.step_instructions, buf)?;
    write_instruction_set(&bc.source_instructions, buf)
}

fn read_bytecode(buf: &mut impl Buf) -> Result<Value, CodecError> {
    let step_instructions = read_instruction_set(buf)?;
    let source_instructions = read_instruction_set(buf)?;
    Ok(Value::Bytecode(Bytecode {
        step_instructions,
        source_instructions,
        bindings: Default::default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn encode_fq(value: &Value) -> BytesMut {
        let mut buf = BytesMut::new();
        write_value(value, &mut buf).unwrap();
        buf
    }

    fn roundtrip(value: Value) {
        let mut buf = encode_fq(&value);
        let decoded = read_value(&mut buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(buf.remaining(), 0, "trailing bytes after {:?}", decoded);
    }

    #[test]
    fn test_int_exact_bytes() {
        assert_eq!(&encode_fq(&Value::Int(0))[..], &[0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            &encode_fq(&Value::Int(i32::MAX))[..],
            &[0x01, 0x00, 0x7f, 0xff, 0xff, 0xff]
        );
        assert_eq!(
            &encode_fq(&Value::Int(i32::MIN))[..],
            &[0x01, 0x00, 0x80, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            &encode_fq(&Value::Int(-1))[..],
            &[0x01, 0x00, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn test_outer_null_is_two_bytes() {
        assert_eq!(&encode_fq(&Value::Null)[..], &[0xfe, 0x01]);
        let mut buf = BytesMut::from(&[0xfe, 0x01][..]);
        assert_eq!(read_value(&mut buf).unwrap(), Value::Null);
    }

    #[test]
    fn test_null_int_fq() {
        let mut buf = BytesMut::new();
        write_null_of(TypeCode::Int, &mut buf);
        assert_eq!(&buf[..], &[0x01, 0x01]);

        // {type=Int}{null flag}: nullable context keeps the null...
        let mut wire = BytesMut::from(&[0x01, 0x01][..]);
        assert_eq!(
            read_fq_expecting(&mut wire, TypeCode::Int, true).unwrap(),
            Value::Null
        );
        // ...a non-nullable numeric context decodes the zero of the width.
        let mut wire = BytesMut::from(&[0x01, 0x01][..]);
        assert_eq!(
            read_fq_expecting(&mut wire, TypeCode::Int, false).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn test_null_in_non_nullable_slot_fails_encode() {
        let mut buf = BytesMut::new();
        let err = write_value_bare(&Value::Null, &mut buf, false).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedNull));
    }

    #[test]
    fn test_truncated_int() {
        // Type + none-flag, then nothing where four bytes are required.
        let mut wire = BytesMut::from(&[0x01, 0x00][..]);
        let err = read_value(&mut wire).unwrap_err();
        assert!(matches!(err, CodecError::BufferExhausted { needed: 4, .. }));
    }

    #[test]
    fn test_bad_value_flag() {
        let mut wire = BytesMut::from(&[0x01, 0x10][..]);
        let err = read_value(&mut wire).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedValueFlag(0x10)));
    }

    #[test]
    fn test_flag_missing() {
        let mut wire = BytesMut::from(&[0x01][..]);
        let err = read_value(&mut wire).unwrap_err();
        assert!(matches!(err, CodecError::ValueFlagMissing));
    }

    #[test]
    fn test_empty_input() {
        let mut wire = BytesMut::new();
        assert!(matches!(
            read_value(&mut wire).unwrap_err(),
            CodecError::MissingBuffer
        ));
    }

    #[test]
    fn test_unknown_type_code() {
        let mut wire = BytesMut::from(&[0x5b, 0x00][..]);
        assert!(matches!(
            read_value(&mut wire).unwrap_err(),
            CodecError::UnknownTypeCode(0x5b)
        ));
    }

    #[test]
    fn test_unexpected_type_code() {
        let mut wire = BytesMut::from(&[0x02, 0x00, 0, 0, 0, 0, 0, 0, 0, 1][..]);
        let err = read_fq_expecting(&mut wire, TypeCode::Int, false).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnexpectedTypeCode {
                expected: 0x01,
                actual: 0x02
            }
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut wire = BytesMut::from(&[0x03, 0x00, 0xff, 0xff, 0xff, 0xff][..]);
        assert!(matches!(
            read_value(&mut wire).unwrap_err(),
            CodecError::UnexpectedValueLength { declared: -1, .. }
        ));
    }

    #[test]
    fn test_length_beyond_buffer_rejected() {
        // String claims 100 bytes, provides 2.
        let mut wire = BytesMut::from(&[0x03, 0x00, 0x00, 0x00, 0x00, 0x64, b'h', b'i'][..]);
        assert!(matches!(
            read_value(&mut wire).unwrap_err(),
            CodecError::UnexpectedValueLength { declared: 100, .. }
        ));
    }

    #[test]
    fn test_string_length_is_byte_count() {
        // "héllo" is 5 code points, 6 bytes.
        let mut buf = encode_fq(&Value::from("héllo"));
        assert_eq!(buf[2..6], [0x00, 0x00, 0x00, 0x06]);
        assert_eq!(read_value(&mut buf).unwrap(), Value::from("héllo"));
    }

    #[test]
    fn test_scalar_roundtrips() {
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::Byte(0xa5));
        roundtrip(Value::Short(-129));
        roundtrip(Value::Int(42));
        roundtrip(Value::Long(1 << 40));
        roundtrip(Value::Float(2.5));
        roundtrip(Value::Double(-0.125));
        roundtrip(Value::from("graph"));
        roundtrip(Value::from(""));
        roundtrip(Value::Uuid(Uuid::new_v4()));
    }

    #[test]
    fn test_uuid_network_order() {
        let id = Uuid::parse_str("00010203-0405-0607-0809-0a0b0c0d0e0f").unwrap();
        let buf = encode_fq(&Value::Uuid(id));
        assert_eq!(
            &buf[2..],
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
        );
    }

    #[test]
    fn test_bigint_zero_is_empty_body() {
        let buf = encode_fq(&Value::BigInt(BigInt::from(0)));
        assert_eq!(&buf[..], &[0x23, 0x00, 0x00, 0x00, 0x00, 0x00]);
        roundtrip(Value::BigInt(BigInt::from(0)));
    }

    #[test]
    fn test_bigint_positive_high_bit_padded() {
        // 255 needs a 0x00 pad so the sign bit reads positive.
        let buf = encode_fq(&Value::BigInt(BigInt::from(255)));
        assert_eq!(&buf[2..], &[0x00, 0x00, 0x00, 0x02, 0x00, 0xff]);
        roundtrip(Value::BigInt(BigInt::from(255)));
    }

    #[test]
    fn test_bigint_negative_minimal() {
        let buf = encode_fq(&Value::BigInt(BigInt::from(-1)));
        assert_eq!(&buf[2..], &[0x00, 0x00, 0x00, 0x01, 0xff]);
        roundtrip(Value::BigInt(BigInt::from(-1)));
        roundtrip(Value::BigInt(BigInt::from(-129)));
        roundtrip(Value::BigInt(
            BigInt::parse_bytes(b"-170141183460469231731687303715884105728", 10).unwrap(),
        ));
        roundtrip(Value::BigInt(
            BigInt::parse_bytes(b"170141183460469231731687303715884105727", 10).unwrap(),
        ));
    }

    #[test]
    fn test_list_roundtrip() {
        roundtrip(Value::List(vec![]));
        roundtrip(Value::List(vec![
            Value::Int(1),
            Value::from("two"),
            Value::Null,
            Value::List(vec![Value::Bool(false)]),
        ]));
    }

    #[test]
    fn test_map_preserves_order_and_null() {
        let map = Value::Map(vec![
            (
                Value::from("a"),
                Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            ),
            (Value::from("b"), Value::Null),
        ]);
        let mut buf = encode_fq(&map);
        let decoded = read_value(&mut buf).unwrap();
        assert_eq!(decoded, map);
        assert_eq!(decoded.get("b"), Some(&Value::Null));
    }

    #[test]
    fn test_map_duplicate_keys_last_wins() {
        let mut buf = BytesMut::new();
        write_value(
            &Value::Map(vec![
                (Value::from("k"), Value::Int(1)),
                (Value::from("k"), Value::Int(2)),
            ]),
            &mut buf,
        )
        .unwrap();
        let decoded = read_value(&mut buf).unwrap();
        assert_eq!(
            decoded,
            Value::Map(vec![(Value::from("k"), Value::Int(2))])
        );
    }

    #[test]
    fn test_bytecode_roundtrip() {
        let mut bc = Bytecode::new();
        bc.add_source("withComputer", vec![]);
        bc.add_step("V", vec![]);
        bc.add_step("has", vec![Value::from("person"), Value::from("name"), Value::from("marko")]);
        bc.add_step("out", vec![Value::from("knows")]);
        bc.add_step("values", vec![Value::from("age")]);
        roundtrip(Value::Bytecode(bc));
    }

    #[test]
    fn test_traverser_roundtrip() {
        roundtrip(Value::Traverser {
            bulk: 3,
            value: Box::new(Value::Map(vec![(
                Value::from("name"),
                Value::from("josh"),
            )])),
        });
    }

    #[test]
    fn test_bare_string_has_no_header() {
        let mut buf = BytesMut::new();
        write_value_bare(&Value::from("g"), &mut buf, false).unwrap();
        assert_eq!(&buf[..], &[0x00, 0x00, 0x00, 0x01, b'g']);
        let decoded = read_value_bare(&mut buf, TypeCode::String, false).unwrap();
        assert_eq!(decoded, Value::from("g"));
    }

    #[test]
    fn test_bare_nullable_roundtrip() {
        let mut buf = BytesMut::new();
        write_value_bare(&Value::from("msg"), &mut buf, true).unwrap();
        assert_eq!(buf[0], VALUE_FLAG_NONE);
        assert_eq!(
            read_value_bare(&mut buf, TypeCode::String, true).unwrap(),
            Value::from("msg")
        );

        let mut buf = BytesMut::new();
        write_value_bare(&Value::Null, &mut buf, true).unwrap();
        assert_eq!(
            read_value_bare(&mut buf, TypeCode::String, true).unwrap(),
            Value::Null
        );
    }
}
