use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::{CacheEngine, CacheStrategy, CachedValue, Claim};
use crate::key::{FunctionKey, ToCacheKey};

type CachedFn<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// A function wrapped by a cache engine.
///
/// `call` has the signature of the wrapped function. When registration was
/// rejected the wrapper holds no binding and always calls the function.
pub struct Memoized<A, R, S: CacheStrategy> {
    func: CachedFn<A, R>,
    binding: Option<Binding<S>>,
}

struct Binding<S: CacheStrategy> {
    engine: CacheEngine<S>,
    function: FunctionKey,
}

impl<S: CacheStrategy> CacheEngine<S> {
    /// Wraps a function item under its qualified name with default options.
    pub fn wrap<A, R, F>(&self, func: F) -> Memoized<A, R, S>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.wrap_named(std::any::type_name::<F>(), S::Options::default(), func)
    }

    /// Wraps a function item under its qualified name.
    pub fn wrap_with<A, R, F>(&self, options: S::Options, func: F) -> Memoized<A, R, S>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.wrap_named(std::any::type_name::<F>(), options, func)
    }

    /// Wraps `func` under an explicit name; required for closures.
    pub fn wrap_named<A, R, F>(
        &self,
        name: impl Into<String>,
        options: S::Options,
        func: F,
    ) -> Memoized<A, R, S>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let binding = self.register(name, options).map(|function| Binding {
            engine: self.clone(),
            function,
        });
        Memoized {
            func: Arc::new(func),
            binding,
        }
    }
}

impl<A, R, S: CacheStrategy> Memoized<A, R, S> {
    pub fn is_cached(&self) -> bool {
        self.binding.is_some()
    }

    pub fn function_key(&self) -> Option<&FunctionKey> {
        self.binding.as_ref().map(|binding| &binding.function)
    }

    pub fn engine(&self) -> Option<&CacheEngine<S>> {
        self.binding.as_ref().map(|binding| &binding.engine)
    }

    /// The same function bound to another handle of the engine, typically a
    /// worker's. Unbound wrappers stay unbound.
    pub fn bind(&self, engine: &CacheEngine<S>) -> Self {
        Self {
            func: Arc::clone(&self.func),
            binding: self.binding.as_ref().map(|binding| Binding {
                engine: engine.clone(),
                function: binding.function.clone(),
            }),
        }
    }
}

impl<A, R, S> Memoized<A, R, S>
where
    A: ToCacheKey,
    R: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    S: CacheStrategy,
{
    pub fn call(&self, args: A) -> R {
        let Some(binding) = &self.binding else {
            return (self.func)(args);
        };

        match binding.engine.claim(&binding.function, args.to_cache_key()) {
            Ok(Claim::Hit(value)) => match self.restore(binding, &value) {
                Some(result) => result,
                None => (self.func)(args),
            },
            Ok(Claim::Vacant(ticket)) => {
                let result = (self.func)(args);
                ticket.fulfill(self.store(binding, &result));
                result
            }
            Ok(Claim::Bypass) => (self.func)(args),
            Err(err) => {
                warn!(function = %binding.function, %err, "cache unavailable; calling function directly");
                (self.func)(args)
            }
        }
    }

    fn store(&self, binding: &Binding<S>, result: &R) -> CachedValue {
        let value = CachedValue::native(result.clone());
        if !binding.engine.strategy().persists_results() {
            return value;
        }
        match serde_json::to_value(result) {
            Ok(encoded) => value.with_encoded(encoded),
            Err(err) => {
                warn!(function = %binding.function, %err, "result cannot be persisted; keeping it in memory only");
                value
            }
        }
    }

    fn restore(&self, binding: &Binding<S>, value: &CachedValue) -> Option<R> {
        if let Some(result) = value.get::<R>() {
            return Some(result);
        }
        let encoded = value.as_encoded()?;
        match serde_json::from_value(encoded.clone()) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(function = %binding.function, %err, "stored result has the wrong shape; recomputing");
                None
            }
        }
    }
}

impl<A, R, S: CacheStrategy> Clone for Memoized<A, R, S> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
            binding: self.binding.as_ref().map(|binding| Binding {
                engine: binding.engine.clone(),
                function: binding.function.clone(),
            }),
        }
    }
}

impl<A, R, S: CacheStrategy> fmt::Debug for Memoized<A, R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("function", &self.function_key())
            .finish_non_exhaustive()
    }
}
