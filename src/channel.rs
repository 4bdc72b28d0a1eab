use std::borrow::Cow;
use std::marker::PhantomData;

/// Named handle for one request/response contract or one broadcast topic.
///
/// `T` is the contract: a `dyn Trait` for request/response channels, the
/// payload type for broadcast channels. It exists only at compile time; on
/// the wire two channels with the same name are the same channel.
pub struct Channel<T: ?Sized> {
    name: Cow<'static, str>,
    _contract: PhantomData<fn() -> PhantomData<T>>,
}

impl<T: ?Sized> Channel<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _contract: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Name a contract. Registers nothing.
pub fn create_channel<T: ?Sized>(name: impl Into<String>) -> Channel<T> {
    Channel {
        name: Cow::Owned(name.into()),
        _contract: PhantomData,
    }
}

impl<T: ?Sized> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _contract: PhantomData,
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Channel").field(&self.name).finish()
    }
}

impl<T: ?Sized> std::fmt::Display for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
