//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

//! Plug-provider registry: dispatches a logical port's `plug-type` option
//! to the registered [`PlugProviderClass`], if any.

use std::collections::HashMap;
use std::sync::Mutex;

use chassis_idl::plug::{PlugIfaceOptions, PlugPortCtx, PlugProviderClass};

#[derive(Default)]
pub struct PlugRegistry {
    providers: Mutex<HashMap<&'static str, &'static dyn PlugProviderClass>>,
}

impl PlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: &'static dyn PlugProviderClass) {
        let mut providers = self.providers.lock().expect("plug registry mutex poisoned");
        providers.insert(provider.plug_type(), provider);
    }

    pub fn get(&self, plug_type: &str) -> Option<&'static dyn PlugProviderClass> {
        let providers = self.providers.lock().expect("plug registry mutex poisoned");
        providers.get(plug_type).copied()
    }

    pub fn len(&self) -> usize {
        self.providers.lock().expect("plug registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes the interface options a plugged port should carry, for a port
/// whose binding options name a registered `plug-type`. Ports with no
/// `plug-type`, or one with no registered provider, are left alone.
pub fn maintained_iface_options(registry: &PlugRegistry, ctx: &PlugPortCtx) -> Option<PlugIfaceOptions> {
    let plug_type = ctx.options.get("plug-type")?;
    let provider = registry.get(plug_type)?;
    Some(provider.maintained_iface_options(ctx))
}

pub fn finish(registry: &PlugRegistry, ctx: &PlugPortCtx) {
    if let Some(plug_type) = ctx.options.get("plug-type") {
        if let Some(provider) = registry.get(plug_type) {
            provider.finish(ctx);
        }
    }
}

pub fn destroy(registry: &PlugRegistry, ctx: &PlugPortCtx) {
    if let Some(plug_type) = ctx.options.get("plug-type") {
        if let Some(provider) = registry.get(plug_type) {
            provider.destroy(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chassis_utils::RowUuid;

    use super::*;

    struct CountingPlug {
        finishes: AtomicUsize,
    }

    impl PlugProviderClass for CountingPlug {
        fn plug_type(&self) -> &'static str {
            "counting"
        }

        fn maintained_iface_options(&self, ctx: &PlugPortCtx) -> PlugIfaceOptions {
            PlugIfaceOptions {
                name: format!("{}-plugged", ctx.logical_port),
                iface_type: "internal".to_owned(),
                options: BTreeMap::new(),
            }
        }

        fn finish(&self, _ctx: &PlugPortCtx) {
            self.finishes.fetch_add(1, Ordering::SeqCst);
        }

        fn destroy(&self, _ctx: &PlugPortCtx) {}
    }

    static COUNTING: CountingPlug = CountingPlug {
        finishes: AtomicUsize::new(0),
    };

    fn ctx(plug_type: &str) -> PlugPortCtx {
        PlugPortCtx {
            logical_port: "p1".to_owned(),
            datapath: RowUuid::new_v4(),
            options: BTreeMap::from([("plug-type".to_owned(), plug_type.to_owned())]),
            mtu_request: None,
        }
    }

    #[test]
    fn dispatches_to_registered_provider() {
        let registry = PlugRegistry::new();
        registry.register(&COUNTING);
        let ctx = ctx("counting");
        let options = maintained_iface_options(&registry, &ctx).unwrap();
        assert_eq!(options.name, "p1-plugged");
        finish(&registry, &ctx);
        assert_eq!(COUNTING.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_plug_type_is_ignored() {
        let registry = PlugRegistry::new();
        let ctx = ctx("unknown");
        assert!(maintained_iface_options(&registry, &ctx).is_none());
    }

    #[test]
    fn no_plug_type_option_is_ignored() {
        let registry = PlugRegistry::new();
        registry.register(&COUNTING);
        let ctx = PlugPortCtx {
            logical_port: "p1".to_owned(),
            datapath: RowUuid::new_v4(),
            options: BTreeMap::new(),
            mtu_request: None,
        };
        assert!(maintained_iface_options(&registry, &ctx).is_none());
    }
}
