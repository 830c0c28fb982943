// Copyright 2026 Canopy Contributors
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

//! Transaction serial generation
//!
//! Provides unique, monotonically increasing serial numbers identifying one
//! in-flight write attempt, used to stamp copy-on-write packets so a second
//! write to the same node within one transaction reuses the already-copied
//! instance.
//!

use std::sync::atomic::{AtomicU64, Ordering};

/// Global state for serial generation. Initialized once at process start,
/// never reset. Serial 0 is reserved as "never stamped".
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(0);

/// Returns a unique, monotonically increasing transaction serial.
///
/// This function guarantees:
/// - Serials are strictly increasing across the whole process
/// - Unique serials even under heavy concurrent usage
///
/// # Example
///
/// ```
/// use canopy::tree::next_serial;
///
/// let s1 = next_serial();
/// let s2 = next_serial();
/// assert!(s2 > s1);
/// ```
pub fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::AcqRel) + 1
}
