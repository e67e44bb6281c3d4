/// A named derived value computed from a store's state.
///
/// Views hold a plain function pointer so they can be declared as `const`
/// next to the state type they read.
pub struct View<T, R> {
    name: &'static str,
    compute: fn(&T) -> R,
}

impl<T, R> View<T, R> {
    pub const fn new(name: &'static str, compute: fn(&T) -> R) -> Self {
        Self { name, compute }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn compute(&self, state: &T) -> R {
        (self.compute)(state)
    }
}
