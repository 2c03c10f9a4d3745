/*
[INPUT]:  Commands from the host, wallet and authority settlements
[OUTPUT]: Auth state, ordered events, delegated identity
[POS]:    Machine layer - sign-in state machine (reducer + actor)
[UPDATE]: When states, transitions or the driver API change
*/

pub mod driver;
pub mod effects;
pub mod reducer;
pub mod state;

pub use driver::{AuthHandle, AuthMachine};
pub use effects::EffectRunner;
pub use reducer::reduce;
pub use state::{
    AuthContext, AuthEvent, AuthState, Command, ContextPatch, Effect, Input, NetworkBinding,
    StepOutcome, Transition,
};
