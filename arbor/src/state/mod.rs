//! Defines per-request storage shared along the handler chain.

pub mod request_id;

use std::any::{Any, TypeId};
use std::collections::HashMap;

use log::trace;

/// A marker for values that may be stored in [`State`]. Blanket-implemented
/// for anything sendable; requests are handled on one task at a time, so no
/// `Sync` bound is needed.
pub trait StateData: Any + Send {}

impl<T: Any + Send> StateData for T {}

/// Provides storage for request state, one item per type. Middleware uses
/// it to hand data down the chain, and the context uses it to memoize
/// lazily-materialized components.
pub struct State {
    data: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl State {
    /// Creates a new, empty `State`.
    pub fn new() -> State {
        State {
            data: HashMap::new(),
        }
    }

    /// Puts a value into storage. Successive calls overwrite the previous
    /// value of the same type.
    pub fn put<T>(&mut self, t: T)
    where
        T: StateData,
    {
        let type_id = TypeId::of::<T>();
        trace!(" inserting record to state for type_id `{:?}`", type_id);
        self.data.insert(type_id, Box::new(t));
    }

    /// Determines if a value of this type is present.
    pub fn has<T>(&self) -> bool
    where
        T: StateData,
    {
        self.data.contains_key(&TypeId::of::<T>())
    }

    /// Tries to borrow a value from storage.
    pub fn try_borrow<T>(&self) -> Option<&T>
    where
        T: StateData,
    {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
    }

    /// Borrows a value from storage.
    ///
    /// # Panics
    ///
    /// If `T` is not present.
    pub fn borrow<T>(&self) -> &T
    where
        T: StateData,
    {
        self.try_borrow()
            .expect("required type is not present in State container")
    }

    /// Tries to mutably borrow a value from storage.
    pub fn try_borrow_mut<T>(&mut self) -> Option<&mut T>
    where
        T: StateData,
    {
        self.data
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut::<T>())
    }

    /// Mutably borrows a value from storage.
    ///
    /// # Panics
    ///
    /// If `T` is not present.
    pub fn borrow_mut<T>(&mut self) -> &mut T
    where
        T: StateData,
    {
        self.try_borrow_mut()
            .expect("required type is not present in State container")
    }

    /// Tries to move a value out of storage.
    pub fn try_take<T>(&mut self) -> Option<T>
    where
        T: StateData,
    {
        self.data
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok())
            .map(|b| *b)
    }

    /// Moves a value out of storage.
    ///
    /// # Panics
    ///
    /// If `T` is not present.
    pub fn take<T>(&mut self) -> T
    where
        T: StateData,
    {
        self.try_take()
            .expect("required type is not present in State container")
    }
}

impl Default for State {
    fn default() -> State {
        State::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MyStruct {
        value: i32,
    }

    struct AnotherStruct;

    #[test]
    fn put_borrow_take() {
        let mut state = State::new();
        state.put(MyStruct { value: 1 });
        assert!(state.has::<MyStruct>());
        assert!(!state.has::<AnotherStruct>());
        assert_eq!(state.borrow::<MyStruct>().value, 1);

        state.borrow_mut::<MyStruct>().value += 10;
        assert_eq!(state.borrow::<MyStruct>().value, 11);

        assert_eq!(state.take::<MyStruct>().value, 11);
        assert!(state.try_borrow::<MyStruct>().is_none());
    }

    #[test]
    fn put_overwrites_same_type() {
        let mut state = State::new();
        state.put(MyStruct { value: 1 });
        state.put(MyStruct { value: 2 });
        assert_eq!(state.borrow::<MyStruct>().value, 2);
    }
}
