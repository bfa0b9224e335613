use jni::{errors::Result, objects::JString, JNIEnv, JavaVM};
use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;
use std::cell::Cell;

/// Longest tag `android.util.Log.isLoggable()` accepts before API 26.
pub const MAX_TAG_LEN: usize = 23;

/// `android.util.Log.DEBUG`
pub const DEBUG: i32 = 3;

/// `android.util.Log.ERROR`
pub const ERROR: i32 = 6;

/// `android.util.Log.INFO`
pub const INFO: i32 = 4;

/// `android.util.Log.VERBOSE`
pub const VERBOSE: i32 = 2;

/// `android.util.Log.WARN`
pub const WARN: i32 = 5;

/// Calls `android.util.Log.println()`.
///
/// # Arguments
///
/// * `env` - Java environment to use.
/// * `priority` - Priority to log at.
/// * `tag` - Tag to use for logging.
/// * `msg` - Message to log.
pub fn println<'a: 'b, 'b>(
    env: &'b JNIEnv<'a>,
    priority: i32,
    tag: JString<'a>,
    msg: JString<'a>,
) -> Result<()> {
    env.call_static_method(
        "android/util/Log",
        "println",
        "(ILjava/lang/String;Ljava/lang/String;)I",
        &[priority.into(), tag.into(), msg.into()],
    )?;
    Ok(())
}

/// Calls `android.util.Log.isLoggable()`.
///
/// # Arguments
///
/// * `env` - Java environment to use.
/// * `tag` - Tag to check.
/// * `level` - Level to check.
pub fn is_loggable<'a: 'b, 'b>(env: &'b JNIEnv<'a>, tag: JString<'a>, level: i32) -> Result<bool> {
    env.call_static_method(
        "android/util/Log",
        "isLoggable",
        "(Ljava/lang/String;I)Z",
        &[tag.into(), level.into()],
    )?
    .z()
}

/// Convert a [`Level`] into a logging priority for `android.util.Log`.
pub fn log_level_to_priority(level: Level) -> i32 {
    match level {
        Level::Debug => DEBUG,
        Level::Error => ERROR,
        Level::Info => INFO,
        Level::Trace => VERBOSE,
        Level::Warn => WARN,
    }
}

/// Turn a `log` target into an Android log tag. Module paths are shortened to
/// their last two segments and the result is cut to [`MAX_TAG_LEN`] bytes.
pub fn target_to_tag(target: &str) -> &str {
    let tag = match target.rmatch_indices("::").nth(1) {
        Some((idx, _)) => &target[idx + 2..],
        None => target,
    };
    if tag.len() <= MAX_TAG_LEN {
        return tag;
    }
    let mut end = MAX_TAG_LEN;
    while !tag.is_char_boundary(end) {
        end -= 1;
    }
    &tag[..end]
}

struct AndroidLog(JavaVM);

thread_local! {
    static IN_LOGGER: Cell<bool> = Cell::new(false);
}

/// Marks the current thread as being inside [`AndroidLog`]. Records emitted
/// while a guard is alive (for example by JNI calls made during logging) are
/// dropped.
struct ReentryGuard(());

impl ReentryGuard {
    fn enter() -> Option<Self> {
        IN_LOGGER.with(|flag| {
            if flag.replace(true) {
                None
            } else {
                Some(Self(()))
            }
        })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        IN_LOGGER.with(|flag| flag.set(false));
    }
}

impl AndroidLog {
    /// Run `f` with any pending Java exception set aside, then put it back.
    /// Returns `None` when called re-entrantly on this thread.
    fn with_env<R>(&self, f: impl FnOnce(&JNIEnv) -> Result<R>) -> Option<Result<R>> {
        let _guard = ReentryGuard::enter()?;
        Some(self.with_env_unguarded(f))
    }

    fn with_env_unguarded<R>(&self, f: impl FnOnce(&JNIEnv) -> Result<R>) -> Result<R> {
        let env = self.0.get_env()?;
        let ex = if env.exception_check()? {
            let ex = env.exception_occurred()?;
            env.exception_clear()?;
            Some(ex)
        } else {
            None
        };

        let result = f(&env);
        if result.is_err() && env.exception_check()? {
            env.exception_clear()?;
        }

        if let Some(ex) = ex {
            env.throw(ex)?;
        }
        result
    }
}

impl Log for AndroidLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.with_env(|env| {
            let level = log_level_to_priority(metadata.level());
            let tag = env.new_string(target_to_tag(metadata.target()))?;
            let _tag_auto_local = env.auto_local(tag);
            is_loggable(env, tag, level)
        })
        .and_then(|r| r.ok())
        .unwrap_or(false)
    }

    fn log(&self, record: &Record) {
        let _ = self.with_env(|env| {
            let level = log_level_to_priority(record.level());
            let tag = env.new_string(target_to_tag(record.target()))?;
            let _tag_auto_local = env.auto_local(tag);

            if is_loggable(env, tag, level)? {
                let msg = env.new_string(format!("{}", record.args()))?;
                let _msg_auto_local = env.auto_local(msg);
                println(env, level, tag, msg)?;
            }
            Ok(())
        });
    }

    fn flush(&self) {}
}

static ANDROID_LOG: OnceCell<AndroidLog> = OnceCell::new();

pub(crate) fn init<'a: 'b, 'b>(env: &'b JNIEnv<'a>) -> Result<()> {
    let vm = env.get_java_vm()?;
    let log = ANDROID_LOG.get_or_init(|| AndroidLog(vm));
    let _ = log::set_logger(log).map(|()| log::set_max_level(LevelFilter::max()));
    Ok(())
}
