//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod ofctrl;
pub mod ovs;
pub mod plug;
pub mod sb;
pub mod tracked;
