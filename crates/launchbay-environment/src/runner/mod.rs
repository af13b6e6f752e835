// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner module - process execution backends.

pub mod mock;
pub mod native;
mod traits;

pub use mock::MockRunner;
pub use native::NativeRunner;
pub use traits::*;
