use jni::{
    errors::Result,
    sys::{jint, JNI_ERR},
    JNIEnv, JNIVersion, JavaVM,
};
use log::error;
use std::{
    ffi::c_void,
    panic::{catch_unwind, AssertUnwindSafe},
};

/// Layer that prepares native code to talk to the host runtime and then runs
/// a deferred initializer.
///
/// Implementations decide which status code to report to the VM, including
/// the one reported when `init` fails.
pub trait Interop<V: ?Sized> {
    /// Initialize interoperability for `vm`, then call `init` once.
    ///
    /// # Arguments
    ///
    /// * `vm` - Virtual machine the library is being loaded into.
    /// * `init` - Initializer to run once the layer is ready.
    fn initialize<F>(self, vm: &V, init: F) -> jint
    where
        F: FnOnce() -> Result<()>;
}

/// Forward a load event to `init` through `interop`.
///
/// `interop` is invoked exactly once. The closure it receives calls `init`
/// exactly once with the same `vm` that was passed in. The return value is the
/// one produced by `interop`, unchanged.
///
/// # Arguments
///
/// * `vm` - Virtual machine handle supplied by the host runtime.
/// * `interop` - Interoperability layer to initialize.
/// * `init` - Module initializer.
pub fn on_load<V, I, F>(vm: &V, interop: I, init: F) -> jint
where
    V: ?Sized,
    I: Interop<V>,
    F: FnOnce(&V) -> Result<()>,
{
    interop.initialize(vm, move || init(vm))
}

/// The JNI interoperability layer.
///
/// Reports [`JNIVersion::V6`] on success. On failure it reports `JNI_ERR` and
/// leaves a Java exception pending, throwing `UnsatisfiedLinkError` if the
/// failure did not already leave one, so `System.loadLibrary()` fails in the
/// caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct JniInterop;

impl JniInterop {
    fn fail(env: &JNIEnv, msg: &str) -> jint {
        error!("{}", msg);
        if !env.exception_check().unwrap_or(true) {
            let _ = env.throw_new("java/lang/UnsatisfiedLinkError", msg);
        }
        JNI_ERR
    }
}

impl Interop<JavaVM> for JniInterop {
    fn initialize<F>(self, vm: &JavaVM, init: F) -> jint
    where
        F: FnOnce() -> Result<()>,
    {
        let env = match vm.get_env() {
            Ok(env) => env,
            Err(_) => return JNI_ERR,
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            crate::init(&env)?;
            init()
        }));
        match result {
            Ok(Ok(())) => JNIVersion::V6.into(),
            Ok(Err(e)) => Self::fail(&env, &format!("nitro-battery failed to load: {}", e)),
            Err(_) => Self::fail(&env, "nitro-battery panicked while loading"),
        }
    }
}

/// Library load entry point. Runs [`crate::module::initialize()`] inside
/// [`JniInterop`] and hands back whatever status that reports.
#[no_mangle]
pub extern "system" fn JNI_OnLoad(vm: JavaVM, _reserved: *mut c_void) -> jint {
    on_load(&vm, JniInterop, crate::module::initialize)
}
