//! The SalesDesk tool orchestrator.
//!
//! An exchange follows a bounded **Ask → Act → Observe** cycle:
//!
//! 1. **Send** the role-scoped system prompt and one user turn to the model
//! 2. **Stream** text back as it is generated
//! 3. **If tool calls**: dispatch them to the exchange's registry, feed the
//!    results back, loop to step 1
//! 4. **If text only**: the exchange is complete
//!
//! The loop stops after `max_steps` round trips, when its wall-clock budget
//! runs out, or when the consumer goes away.

pub mod orchestrator;
pub mod prompt;
pub mod stream_event;
pub mod title;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use orchestrator::{ExchangeRequest, Orchestrator};
pub use prompt::{system_prompt, user_turn};
pub use stream_event::{ExchangeEvent, ExchangeStatus};
pub use title::TitleGenerator;
