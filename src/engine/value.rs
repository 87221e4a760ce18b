use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// One stored result.
///
/// Results computed in this process keep their native form, so hits return
/// exactly what the function produced. Durable stores also keep the encoded
/// form, which is all that exists for results loaded from disk.
#[derive(Clone, Default)]
pub struct CachedValue {
    native: Option<Arc<dyn Any + Send + Sync>>,
    encoded: Option<Value>,
}

impl CachedValue {
    pub fn native<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            native: Some(Arc::new(value)),
            encoded: None,
        }
    }

    pub fn encoded(value: Value) -> Self {
        Self {
            native: None,
            encoded: Some(value),
        }
    }

    pub fn with_encoded(mut self, value: Value) -> Self {
        self.encoded = Some(value);
        self
    }

    /// The native result, when it was stored as a `T`.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.native.as_deref()?.downcast_ref::<T>().cloned()
    }

    pub fn as_encoded(&self) -> Option<&Value> {
        self.encoded.as_ref()
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }
}

impl fmt::Debug for CachedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedValue")
            .field("native", &self.native.is_some())
            .field("encoded", &self.encoded)
            .finish()
    }
}
