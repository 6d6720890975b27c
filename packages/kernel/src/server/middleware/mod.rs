pub mod auth;

pub use auth::{require_actor, resolver_for, ActorResolver, DevActorResolver, JwtActorResolver};
