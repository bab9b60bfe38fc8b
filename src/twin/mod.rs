// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Twin reconciliation: bringing devices to their desired values and
//! recording what they report.

mod reconciler;
mod validate;

use serde::Deserialize;

pub use reconciler::{CycleReport, SET_PROPERTY, TwinReconciler};
pub use validate::{normalize_boolean, normalize_reading, to_wire, validate};

/// What to store as reported when the read after a successful write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyPolicy {
    /// Keep the previous reported value and count an adapter failure. The
    /// write is retried next cycle because desired still diverges.
    #[default]
    Strict,
    /// Assume the write took effect and report the written value.
    Optimistic,
}
