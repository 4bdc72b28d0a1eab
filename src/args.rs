//! Positional argument lists for typed calls.
//!
//! Arguments travel as a JSON array. Tuples map onto it element by element,
//! `()` being the empty list.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Pack call arguments into the wire array.
pub trait IntoArgs {
    fn into_args(self) -> serde_json::Result<Vec<Value>>;
}

/// Unpack the wire array into handler arguments.
///
/// Missing trailing arguments read as `null` and extra ones are ignored,
/// matching how the webview side calls functions.
pub trait FromArgs: Sized {
    fn from_args(args: Vec<Value>) -> serde_json::Result<Self>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> serde_json::Result<Vec<Value>> {
        Ok(self)
    }
}

impl FromArgs for Vec<Value> {
    fn from_args(args: Vec<Value>) -> serde_json::Result<Self> {
        Ok(args)
    }
}

macro_rules! tuple_args {
    ($($name:ident),*) => {
        impl<$($name: Serialize),*> IntoArgs for ($($name,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> serde_json::Result<Vec<Value>> {
                let ($($name,)*) = self;
                Ok(vec![$(serde_json::to_value($name)?),*])
            }
        }

        impl<$($name: DeserializeOwned),*> FromArgs for ($($name,)*) {
            #[allow(unused_mut, unused_variables)]
            fn from_args(args: Vec<Value>) -> serde_json::Result<Self> {
                let mut args = args.into_iter();
                Ok(($(
                    serde_json::from_value::<$name>(args.next().unwrap_or(Value::Null))?,
                )*))
            }
        }
    };
}

tuple_args!();
tuple_args!(A);
tuple_args!(A, B);
tuple_args!(A, B, C);
tuple_args!(A, B, C, D);
tuple_args!(A, B, C, D, E);
tuple_args!(A, B, C, D, E, F);
