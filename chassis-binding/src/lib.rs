//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod ager;
pub mod ctzone;
pub mod plug;
pub mod runtime_data;

pub use ager::MacBindingAger;
pub use ctzone::CtZoneAllocator;
pub use plug::PlugRegistry;
pub use runtime_data::RuntimeData;
