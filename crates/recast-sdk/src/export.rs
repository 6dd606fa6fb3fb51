//! Guest export macro.

/// Export a transform as a wasm guest module.
///
/// ```ignore
/// fn double(record: Record, _ctx: &InvocationContext) -> TransformResult { ... }
/// recast_sdk::transform_main!(double);
///
/// // or with custom setup logic that registers the transform itself:
/// recast_sdk::transform_main!(@setup |rt: &mut TransformRuntime| {
///     let scale = recast_sdk::env::var_or("SCALE", "2");
///     rt.register(Scaler::new(&scale)?)
/// });
/// ```
///
/// On `wasm32` this generates the `recast_alloc`, `recast_dealloc`, `setup`,
/// `on_record_written` and `teardown` exports over a single runtime slot.
/// Guest crates are built as `cdylib`; on native targets the macro expands
/// to nothing so the crate's unit tests still build.
///
/// `wasm32-unknown-unknown` builds abort on panic, so a panicking transform
/// does not unwind back into the shim. The guest traps instead, the host
/// reports the invocation as FATAL (`GUEST_TRAP`) and never calls that
/// instance again. Panics are caught and reported as `PANICKED` only when
/// the runtime is embedded natively.
#[macro_export]
macro_rules! transform_main {
    (@setup $init:expr) => {
        #[cfg(target_arch = "wasm32")]
        mod __recast_guest {
            #[allow(unused_imports)]
            use super::*;

            use std::cell::RefCell;
            use std::sync::OnceLock;

            use $crate::runtime::{invocation_status, TransformRuntime};
            use $crate::Status;

            struct SyncRefCell(RefCell<TransformRuntime>);
            // wasm32 guests are single-threaded and the host never re-enters.
            unsafe impl Sync for SyncRefCell {}

            static RUNTIME: OnceLock<SyncRefCell> = OnceLock::new();

            fn runtime() -> &'static RefCell<TransformRuntime> {
                &RUNTIME
                    .get_or_init(|| {
                        SyncRefCell(RefCell::new(TransformRuntime::new(
                            $crate::host_ffi::host_imports(),
                        )))
                    })
                    .0
            }

            #[no_mangle]
            pub extern "C" fn recast_alloc(size: i32) -> i32 {
                $crate::memory::allocate(size)
            }

            #[no_mangle]
            pub unsafe extern "C" fn recast_dealloc(ptr: i32, capacity: i32) {
                $crate::memory::deallocate(ptr, capacity)
            }

            #[no_mangle]
            pub extern "C" fn setup() -> i32 {
                match runtime().borrow_mut().setup_with($init) {
                    Ok(()) => Status::Ok.code(),
                    Err(_) => Status::FatalError.code(),
                }
            }

            #[no_mangle]
            pub unsafe extern "C" fn on_record_written(ptr: i32, len: i32) -> i32 {
                let wire = $crate::memory::take_guest_bytes(ptr, len);
                let result = runtime().borrow_mut().on_record_written(&wire);
                invocation_status(&result).code()
            }

            #[no_mangle]
            pub extern "C" fn teardown() -> i32 {
                match runtime().borrow_mut().teardown() {
                    Ok(_) => Status::Ok.code(),
                    Err(_) => Status::FatalError.code(),
                }
            }
        }
    };
    ($transform:expr) => {
        $crate::transform_main!(@setup |rt: &mut $crate::runtime::TransformRuntime| {
            rt.register($transform)
        });
    };
}
