//! Test modules for the LLVM backend.

mod driver_tests;
mod exec_tests;

pub mod helper {
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU32, AtomicU64, Ordering};
    use std::sync::Arc;

    use nvc_jit::{FrameAnchor, Jit, JitForeign, JitHandle, JIT_MAX_ARGS};

    use crate::jit::{JitSession, RuntimeHooks};

    // Recorded by the hook functions below. One test exercises each hook,
    // so plain statics are enough.
    pub static LAST_EXIT: AtomicI32 = AtomicI32::new(-1);
    pub static LAST_EXIT_IRPOS: AtomicU32 = AtomicU32::new(u32::MAX);
    pub static LAST_FFI_SPEC: AtomicU64 = AtomicU64::new(0);
    pub static PRIV: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

    unsafe extern "C" fn test_do_exit(which: i32, anchor: *mut FrameAnchor, _args: *mut i64) {
        LAST_EXIT.store(which, Ordering::SeqCst);
        LAST_EXIT_IRPOS.store((*anchor).ir_position, Ordering::SeqCst);
    }

    unsafe extern "C" fn test_do_fficall(
        foreign: *const JitForeign,
        _anchor: *mut FrameAnchor,
        args: *mut i64,
    ) {
        LAST_FFI_SPEC.store((*foreign).spec, Ordering::SeqCst);
        *args = 99;
    }

    unsafe extern "C" fn test_getpriv(_slot: i32) -> *mut c_void {
        PRIV.load(Ordering::SeqCst)
    }

    unsafe extern "C" fn test_putpriv(_slot: i32, ptr: *mut c_void) {
        PRIV.store(ptr, Ordering::SeqCst);
    }

    unsafe extern "C" fn test_mspace_alloc(size: i32, nelems: i32) -> *mut c_void {
        let bytes = (size as usize * nelems as usize).max(1);
        let layout = std::alloc::Layout::from_size_align(bytes, 8).unwrap();
        // Leaked on purpose; tests allocate a few dozen bytes.
        unsafe { std::alloc::alloc_zeroed(layout).cast() }
    }

    pub fn hooks() -> RuntimeHooks {
        RuntimeHooks {
            do_exit: test_do_exit,
            do_fficall: test_do_fficall,
            getpriv: test_getpriv,
            putpriv: test_putpriv,
            mspace_alloc: test_mspace_alloc,
        }
    }

    pub fn session() -> JitSession {
        JitSession::with_hooks(hooks())
    }

    /// Compile `handle` and run it against `args` with a root anchor.
    pub fn compile_and_run(
        session: &JitSession,
        jit: &Jit,
        handle: JitHandle,
        args: &mut [i64; JIT_MAX_ARGS],
    ) {
        session.compile(jit, handle);
        run(jit, handle, args);
    }

    /// Run an already compiled function.
    pub fn run(jit: &Jit, handle: JitHandle, args: &mut [i64; JIT_MAX_ARGS]) {
        let func = jit.get_func(handle);
        let entry = func.entry().expect("entry pointer published");
        let mut anchor = FrameAnchor::root();
        unsafe { entry(Arc::as_ptr(&func), &mut anchor, args.as_mut_ptr()) };
    }
}
