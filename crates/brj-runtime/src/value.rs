use std::fmt;

use smol_str::SmolStr;

use crate::fault::RuntimeError;
use crate::object::{alloc, bool_word, object, Handle, Object, Word};

/// An owned, thread-independent copy of a runtime value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    Vector(Vec<Value>),
    /// Elements in ascending order.
    Set(Vec<Value>),
    /// Entries in ascending key order.
    Map(Vec<(Value, Value)>),
    Fn {
        name: SmolStr,
        arity: usize,
    },
    Variant {
        data_type: SmolStr,
        constructor: SmolStr,
        fields: Vec<Value>,
    },
}

impl Value {
    /// Copies the object graph behind `word` out of the heap.
    pub fn decode(word: Word) -> Result<Value, RuntimeError> {
        let handle = |h: &Handle| Value::decode(h.word());
        Ok(match unsafe { object(word) } {
            Object::Bool(b) => Value::Bool(*b),
            Object::Int(n) => Value::Int(*n),
            Object::Str(s) => Value::Str(s.clone()),
            Object::Vector(items) => Value::Vector(items.iter().map(handle).collect::<Result<_, _>>()?),
            Object::Set(items) => Value::Set(items.iter().map(handle).collect::<Result<_, _>>()?),
            Object::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((handle(k)?, handle(v)?)))
                    .collect::<Result<_, RuntimeError>>()?,
            ),
            Object::Fn(f) => Value::Fn {
                name: f.name.clone(),
                arity: f.arity,
            },
            Object::Variant(v) => Value::Variant {
                data_type: v.constructor.data_type.name.clone(),
                constructor: v.constructor.name.clone(),
                fields: v
                    .fields
                    .iter()
                    .map(|c| Value::decode(c.get()))
                    .collect::<Result<_, _>>()?,
            },
            Object::Fault => return Err(RuntimeError::Escaped),
        })
    }

    /// Allocates this value on the current thread's heap.
    pub fn encode(&self) -> Result<Word, RuntimeError> {
        let handles = |items: &[Value]| -> Result<Vec<Handle>, RuntimeError> {
            items.iter().map(|v| v.encode().map(Handle)).collect()
        };
        Ok(match self {
            Value::Bool(b) => bool_word(*b),
            Value::Int(n) => alloc(Object::Int(*n)),
            Value::Str(s) => alloc(Object::Str(s.clone())),
            Value::Vector(items) => alloc(Object::Vector(handles(items)?.into_iter().collect())),
            Value::Set(items) => alloc(Object::Set(handles(items)?.into_iter().collect())),
            Value::Map(entries) => {
                let mut map = im::OrdMap::new();
                for (k, v) in entries {
                    map.insert(Handle(k.encode()?), Handle(v.encode()?));
                }
                alloc(Object::Map(map))
            }
            Value::Fn { .. } => return Err(RuntimeError::NotEncodable("function")),
            Value::Variant { .. } => return Err(RuntimeError::NotEncodable("variant")),
        })
    }
}

fn write_seq<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: impl Iterator<Item = &'a Value>,
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Vector(items) => write_seq(f, "[", items.iter(), "]"),
            Value::Set(items) => write_seq(f, "#{", items.iter(), "}"),
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Fn { name, arity } => write!(f, "<fn {}/{}>", name, arity),
            Value::Variant {
                constructor,
                fields,
                ..
            } if fields.is_empty() => write!(f, "{}", constructor),
            Value::Variant {
                constructor,
                fields,
                ..
            } => {
                write!(f, "({}", constructor)?;
                for field in fields {
                    write!(f, " {}", field)?;
                }
                write!(f, ")")
            }
        }
    }
}
