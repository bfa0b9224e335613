use jni::{errors::Result, JNIEnv};

pub mod battery;
pub mod bridge;
pub mod listener;
pub mod log;
pub mod module;
pub mod onload;
pub mod receiver;

/// Initialize [`nitro-battery`](crate). This installs the Android logger
/// implementation and initializes `jni-utils`. [`onload::JniInterop`] calls
/// this before running the module initializer, so it normally does not need
/// to be called by hand.
///
/// # Arguments
///
/// * `env` - Java environment to use.
pub fn init<'a: 'b, 'b>(env: &'b JNIEnv<'a>) -> Result<()> {
    log::init(env)?;
    jni_utils::init(env)?;
    Ok(())
}
