// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod coordinator;
mod facade;
mod local_cache;
mod registry;
pub mod shared;

// Public API - callers go through CacheFacade; the tiers are exposed for
// wiring and inspection
pub use coordinator::{FetchCoordinator, LoadOutcome};
pub use facade::{CacheFacade, CacheStatsSnapshot, FetchSettings, MGetResult, Slot};
pub use local_cache::LocalCache;
pub use registry::{CacheRegistry, PrefixSetting};
pub use shared::{SharedCache, ShardClient, ShardHealth};

use std::time::Duration;

use tokio::time::Instant;

/// Longest lifetime any tier gives an entry; larger TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(86400 * 365 * 30);

/// Expiry instant for an entry stored now with `ttl`, clamped to [`MAX_TTL`].
pub(crate) fn expires_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl.min(MAX_TTL))
        .unwrap_or_else(|| now + Duration::from_secs(86400))
}
