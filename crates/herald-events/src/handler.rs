//! Uniform invocation of listener callbacks across argument arities.

use crate::outcome::Outcome;

/// A listener callback invocable with a borrowed argument tuple.
///
/// An [`EventSource`](crate::EventSource) drives every listener through this
/// one seam, whether the tuple arrives fresh from `trigger` or is replayed
/// out of the deferred buffer. Blanket impls unpack the tuple into discrete
/// by-reference arguments, so plain closures work for every arity up to
/// eight:
///
/// - `FnMut(&T0, .., &Tn) -> Outcome` implements
///   `EventHandler<(T0, .., Tn)>`;
/// - `FnMut() -> Outcome` implements `EventHandler<()>` through a separate
///   impl that never reads or unpacks any arguments.
///
/// Stateful handlers can implement the trait directly instead of going
/// through a closure.
///
/// Implementations must not catch panics themselves; containment happens at
/// the dispatch boundary.
pub trait EventHandler<Args> {
    /// Invoke the callback with the fields of `args`.
    fn invoke(&mut self, args: &Args) -> Outcome;
}

impl<Fun> EventHandler<()> for Fun
where
    Fun: FnMut() -> Outcome,
{
    fn invoke(&mut self, _args: &()) -> Outcome {
        (self)()
    }
}

macro_rules! impl_handler {
    ($($($ty:ident $idx:tt)+;)+) => {
        $(
            impl<Fun, $($ty),+> EventHandler<($($ty,)+)> for Fun
            where
                Fun: FnMut($(&$ty),+) -> Outcome,
            {
                fn invoke(&mut self, args: &($($ty,)+)) -> Outcome {
                    (self)($(&args.$idx),+)
                }
            }
        )+
    };
}

impl_handler! {
    A0 0;
    A0 0 A1 1;
    A0 0 A1 1 A2 2;
    A0 0 A1 1 A2 2 A3 3;
    A0 0 A1 1 A2 2 A3 3 A4 4;
    A0 0 A1 1 A2 2 A3 3 A4 4 A5 5;
    A0 0 A1 1 A2 2 A3 3 A4 4 A5 5 A6 6;
    A0 0 A1 1 A2 2 A3 3 A4 4 A5 5 A6 6 A7 7;
}
