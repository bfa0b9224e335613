use crate::{
    battery::BatteryState,
    listener::ListenerId,
    module::NitroBattery,
};
use jni::{
    errors::{Error, Result},
    objects::{GlobalRef, JClass, JObject},
    sys::{jboolean, jdouble, jlong, jstring, JNI_FALSE, JNI_TRUE},
    JNIEnv, JavaVM, NativeMethod,
};
use jni_utils::exceptions::throw_unwind;
use log::warn;
use std::{ffi::c_void, panic::AssertUnwindSafe, sync::Arc};

/// Class the native methods are registered on.
pub const BRIDGE_CLASS: &str = "com/margelo/nitro/battery/NativeBattery";

fn native(name: &str, sig: &str, fn_ptr: *mut c_void) -> NativeMethod {
    NativeMethod {
        name: name.into(),
        sig: sig.into(),
        fn_ptr,
    }
}

/// Register the native methods of [`BRIDGE_CLASS`].
///
/// Every method forwards to [`NitroBattery::global()`]. Rust panics become
/// `PanicException`s via [`throw_unwind()`]; other failures go through
/// [`throw_error()`], and the method returns a placeholder value that the
/// pending exception makes irrelevant.
///
/// # Arguments
///
/// * `env` - Java environment to use.
pub fn register<'a: 'b, 'b>(env: &'b JNIEnv<'a>) -> Result<()> {
    let methods = [
        native("getLevel", "()D", get_level as *mut c_void),
        native("isCharging", "()Z", is_charging as *mut c_void),
        native(
            "getBatteryState",
            "()Ljava/lang/String;",
            get_battery_state as *mut c_void,
        ),
        native(
            "isLowPowerModeEnabled",
            "()Z",
            is_low_power_mode_enabled as *mut c_void,
        ),
        native(
            "addBatteryStateListener",
            "(Ljava/util/function/Consumer;)J",
            add_battery_state_listener as *mut c_void,
        ),
        native(
            "removeBatteryStateListener",
            "(J)Z",
            remove_battery_state_listener as *mut c_void,
        ),
        native(
            "addLowPowerListener",
            "(Ljava/lang/Runnable;)J",
            add_low_power_listener as *mut c_void,
        ),
        native(
            "removeLowPowerListener",
            "(J)Z",
            remove_low_power_listener as *mut c_void,
        ),
        native(
            "removeAllListeners",
            "()V",
            remove_all_listeners as *mut c_void,
        ),
    ];
    env.register_native_methods(BRIDGE_CLASS, &methods)
}

/// Make sure a Java exception is pending for `err`. Errors other than
/// [`Error::JavaException`] become a `java.lang.RuntimeException` unless an
/// exception is already pending.
///
/// # Arguments
///
/// * `env` - Java environment to use.
/// * `err` - Error to report.
pub fn throw_error(env: &JNIEnv, err: Error) {
    if let Error::JavaException = err {
        return;
    }
    if !env.exception_check().unwrap_or(true) {
        let _ = env.throw_new("java/lang/RuntimeException", err.to_string());
    }
}

fn call<'a: 'b, 'b, R>(
    env: &'b JNIEnv<'a>,
    fallback: R,
    f: impl FnOnce(&'static NitroBattery) -> Result<R>,
) -> R {
    let result = throw_unwind(env, AssertUnwindSafe(|| NitroBattery::global(env).and_then(f)));
    match result {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            throw_error(env, e);
            fallback
        }
        Err(_) => fallback,
    }
}

fn to_jboolean(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// Run a Java listener callback on the current (event) thread. Failures are
/// logged and cleared so the remaining listeners still run.
fn deliver(vm: &JavaVM, f: impl FnOnce(&JNIEnv) -> Result<()>) {
    let env = match vm.get_env() {
        Ok(env) => env,
        Err(e) => {
            warn!("listener called on a detached thread: {}", e);
            return;
        }
    };
    if let Err(e) = f(&env) {
        warn!("listener failed: {}", e);
        if env.exception_check().unwrap_or(false) {
            let _ = env.exception_describe();
            let _ = env.exception_clear();
        }
    }
}

extern "system" fn get_level(env: JNIEnv, _class: JClass) -> jdouble {
    call(&env, -1.0, |battery| battery.get_level(&env))
}

extern "system" fn is_charging(env: JNIEnv, _class: JClass) -> jboolean {
    call(&env, JNI_FALSE, |battery| {
        battery.is_charging(&env).map(to_jboolean)
    })
}

extern "system" fn get_battery_state(env: JNIEnv, _class: JClass) -> jstring {
    call(&env, JObject::null().into_inner(), |battery| {
        let state = battery.get_battery_state(&env)?;
        Ok(env.new_string(state.as_str())?.into_inner())
    })
}

extern "system" fn is_low_power_mode_enabled(env: JNIEnv, _class: JClass) -> jboolean {
    call(&env, JNI_FALSE, |battery| {
        battery.is_low_power_mode_enabled(&env).map(to_jboolean)
    })
}

extern "system" fn add_battery_state_listener(
    env: JNIEnv,
    _class: JClass,
    consumer: JObject,
) -> jlong {
    call(&env, 0, |battery| {
        let vm = env.get_java_vm()?;
        let consumer: GlobalRef = env.new_global_ref(consumer)?;
        let listener = move |state: BatteryState| {
            deliver(&vm, |env| {
                let state = env.auto_local(env.new_string(state.as_str())?);
                env.call_method(
                    consumer.as_obj(),
                    "accept",
                    "(Ljava/lang/Object;)V",
                    &[state.as_obj().into()],
                )?;
                Ok(())
            })
        };
        let id = battery.add_battery_state_listener(&env, Arc::new(listener))?;
        Ok(id.get() as jlong)
    })
}

extern "system" fn remove_battery_state_listener(env: JNIEnv, _class: JClass, id: jlong) -> jboolean {
    call(&env, JNI_FALSE, |battery| {
        battery
            .remove_battery_state_listener(&env, ListenerId::from_raw(id as u64))
            .map(to_jboolean)
    })
}

extern "system" fn add_low_power_listener(env: JNIEnv, _class: JClass, runnable: JObject) -> jlong {
    call(&env, 0, |battery| {
        let vm = env.get_java_vm()?;
        let runnable: GlobalRef = env.new_global_ref(runnable)?;
        let listener = move || {
            deliver(&vm, |env| {
                env.call_method(runnable.as_obj(), "run", "()V", &[])?;
                Ok(())
            })
        };
        let id = battery.add_low_power_listener(&env, Arc::new(listener))?;
        Ok(id.get() as jlong)
    })
}

extern "system" fn remove_low_power_listener(env: JNIEnv, _class: JClass, id: jlong) -> jboolean {
    call(&env, JNI_FALSE, |battery| {
        battery
            .remove_low_power_listener(&env, ListenerId::from_raw(id as u64))
            .map(to_jboolean)
    })
}

extern "system" fn remove_all_listeners(env: JNIEnv, _class: JClass) {
    call(&env, (), |battery| battery.remove_all_listeners(&env))
}
