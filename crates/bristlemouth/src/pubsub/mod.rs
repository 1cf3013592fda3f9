// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic-based publish/subscribe bus.
//!
//! Subscriptions are keyed by exact topic string. A publish is delivered to
//! local subscribers through the middleware thread (`bm-middleware`) and handed
//! to the network transport, if one is attached. Inbound network messages enter
//! through [`Bus::handle_message`] and take the same delivery path.
//!
//! Callbacks always run on the middleware thread, never on the publisher's
//! stack, so a callback may publish again without re-entering the registry.

mod bus;
mod error;
pub mod wire;

pub use bus::{Bus, PubSubCallback, Transport};
pub use error::PubSubError;
pub use wire::BM_TOPIC_MAX_LEN;
