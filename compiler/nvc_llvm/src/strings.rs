//! Deduplicated private constant strings.

use std::cell::RefCell;

use inkwell::module::Linkage;
use inkwell::values::{GlobalValue, PointerValue, UnnamedAddress};
use rustc_hash::FxHashMap;

use crate::context::{CodegenCx, SimpleCx};

pub(crate) struct StringPool<'ll> {
    pool: RefCell<FxHashMap<Vec<u8>, GlobalValue<'ll>>>,
}

impl<'ll> StringPool<'ll> {
    pub fn new() -> Self {
        StringPool {
            pool: RefCell::new(FxHashMap::default()),
        }
    }

    /// A pointer to a NUL-terminated constant holding `bytes`, emitted at
    /// most once per module.
    fn intern(&self, scx: &SimpleCx<'ll>, bytes: &[u8]) -> PointerValue<'ll> {
        if let Some(global) = self.pool.borrow().get(bytes) {
            return global.as_pointer_value();
        }

        let init = scx.llcx.const_string(bytes, true);
        let global = scx.llmod.add_global(init.get_type(), None, "const_string");
        global.set_initializer(&init);
        global.set_constant(true);
        global.set_linkage(Linkage::Private);
        global.set_unnamed_address(UnnamedAddress::Global);

        self.pool.borrow_mut().insert(bytes.to_vec(), global);
        global.as_pointer_value()
    }
}

impl<'ll> CodegenCx<'ll> {
    /// Intern a constant string and return its address.
    pub(crate) fn const_string(&self, s: &str) -> PointerValue<'ll> {
        self.strings.intern(&self.scx, s.as_bytes())
    }
}
