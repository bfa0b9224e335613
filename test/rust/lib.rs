use futures::{channel::mpsc::unbounded, StreamExt};
use jni::{
    errors::Error,
    objects::{JObject, JValue},
    sys::{jint, jlong, JNI_ERR},
    JNIEnv, JNIVersion,
};
use jni_utils::exceptions::throw_unwind;
use nitro_battery::{
    battery::{
        BatteryState, ACTION_BATTERY_CHANGED, ACTION_POWER_SAVE_MODE_CHANGED,
        BATTERY_PROPERTY_CAPACITY, BATTERY_SERVICE, BATTERY_STATUS_CHARGING,
        BATTERY_STATUS_DISCHARGING, BATTERY_STATUS_FULL, BATTERY_STATUS_NOT_CHARGING,
        EXTRA_STATUS, POWER_SERVICE,
    },
    bridge::{throw_error, BRIDGE_CLASS},
    module::{running_event_threads, NitroBattery},
    onload::{on_load, JniInterop},
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn application<'a: 'b, 'b>(env: &'b JNIEnv<'a>) -> JObject<'a> {
    env.call_static_method(
        "org/robolectric/RuntimeEnvironment",
        "getApplication",
        "()Landroid/app/Application;",
        &[],
    )
    .unwrap()
    .l()
    .unwrap()
}

fn idle_main_looper<'a: 'b, 'b>(env: &'b JNIEnv<'a>) {
    let looper = env
        .call_static_method(
            "android/os/Looper",
            "getMainLooper",
            "()Landroid/os/Looper;",
            &[],
        )
        .unwrap()
        .l()
        .unwrap();
    let shadow_looper = env
        .call_static_method(
            "org/robolectric/Shadows",
            "shadowOf",
            "(Landroid/os/Looper;)Lorg/robolectric/shadows/ShadowLooper;",
            &[looper.into()],
        )
        .unwrap()
        .l()
        .unwrap();
    env.call_method(shadow_looper, "idle", "()V", &[]).unwrap();
}

fn new_intent<'a: 'b, 'b>(env: &'b JNIEnv<'a>, action: &str) -> JObject<'a> {
    let action = env.new_string(action).unwrap();
    env.new_object("android/content/Intent", "(Ljava/lang/String;)V", &[action.into()])
        .unwrap()
}

fn battery_intent<'a: 'b, 'b>(env: &'b JNIEnv<'a>, status: i32) -> JObject<'a> {
    let intent = new_intent(env, ACTION_BATTERY_CHANGED);
    let key = env.new_string(EXTRA_STATUS).unwrap();
    env.call_method(
        intent,
        "putExtra",
        "(Ljava/lang/String;I)Landroid/content/Intent;",
        &[key.into(), status.into()],
    )
    .unwrap();
    intent
}

fn send_sticky_status<'a: 'b, 'b>(env: &'b JNIEnv<'a>, status: i32) {
    let intent = battery_intent(env, status);
    env.call_method(
        application(env),
        "sendStickyBroadcast",
        "(Landroid/content/Intent;)V",
        &[intent.into()],
    )
    .unwrap();
}

fn send_broadcast<'a: 'b, 'b>(env: &'b JNIEnv<'a>, intent: JObject<'a>) {
    env.call_method(
        application(env),
        "sendBroadcast",
        "(Landroid/content/Intent;)V",
        &[intent.into()],
    )
    .unwrap();
    idle_main_looper(env);
}

fn shadow_service<'a: 'b, 'b>(env: &'b JNIEnv<'a>, name: &str, class: &str) -> JObject<'a> {
    let name = env.new_string(name).unwrap();
    let service = env
        .call_method(
            application(env),
            "getSystemService",
            "(Ljava/lang/String;)Ljava/lang/Object;",
            &[name.into()],
        )
        .unwrap()
        .l()
        .unwrap();
    env.call_static_method(
        "org/robolectric/Shadows",
        "shadowOf",
        format!(
            "(Landroid/os/{};)Lorg/robolectric/shadows/Shadow{};",
            class, class
        ),
        &[service.into()],
    )
    .unwrap()
    .l()
    .unwrap()
}

fn take_exception<'a: 'b, 'b>(env: &'b JNIEnv<'a>, class: &str) {
    assert_eq!(env.exception_check().unwrap(), true);
    let ex = env.exception_occurred().unwrap();
    env.exception_clear().unwrap();
    assert!(env.is_instance_of(ex, class).unwrap());
}

fn timeout_millis() -> jlong {
    EVENT_TIMEOUT.as_millis() as jlong
}

/// Next value handed to a `RecordingConsumer`, or `None` on timeout.
fn next_state<'a: 'b, 'b>(env: &'b JNIEnv<'a>, consumer: JObject<'a>) -> Option<String> {
    let value = env
        .call_method(
            consumer,
            "next",
            "(J)Ljava/lang/String;",
            &[timeout_millis().into()],
        )
        .unwrap()
        .l()
        .unwrap();
    if value.is_null() {
        None
    } else {
        Some(env.get_string(value.into()).unwrap().into())
    }
}

fn call_bridge<'a: 'b, 'b>(
    env: &'b JNIEnv<'a>,
    name: &str,
    sig: &str,
    args: &[JValue<'a>],
) -> JValue<'a> {
    env.call_static_method(BRIDGE_CLASS, name, sig, args).unwrap()
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testBatteryState(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        let battery = NitroBattery::new(&env, application(&env)).unwrap();

        send_sticky_status(&env, BATTERY_STATUS_CHARGING);
        assert_eq!(
            battery.get_battery_state(&env).unwrap(),
            BatteryState::Charging
        );
        assert_eq!(battery.is_charging(&env).unwrap(), true);

        send_sticky_status(&env, BATTERY_STATUS_FULL);
        assert_eq!(battery.get_battery_state(&env).unwrap(), BatteryState::Full);
        assert_eq!(battery.is_charging(&env).unwrap(), true);

        send_sticky_status(&env, BATTERY_STATUS_DISCHARGING);
        assert_eq!(
            battery.get_battery_state(&env).unwrap(),
            BatteryState::Discharging
        );
        assert_eq!(battery.is_charging(&env).unwrap(), false);

        send_sticky_status(&env, BATTERY_STATUS_NOT_CHARGING);
        assert_eq!(
            battery.get_battery_state(&env).unwrap(),
            BatteryState::Unknown
        );
        assert_eq!(battery.is_charging(&env).unwrap(), false);
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testLevel(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        let battery = NitroBattery::new(&env, application(&env)).unwrap();
        let shadow = shadow_service(&env, BATTERY_SERVICE, "BatteryManager");

        env.call_method(
            shadow,
            "setIntProperty",
            "(II)V",
            &[BATTERY_PROPERTY_CAPACITY.into(), 42i32.into()],
        )
        .unwrap();
        assert_eq!(battery.get_level(&env).unwrap(), 42.0);

        env.call_method(
            shadow,
            "setIntProperty",
            "(II)V",
            &[BATTERY_PROPERTY_CAPACITY.into(), i32::MIN.into()],
        )
        .unwrap();
        assert_eq!(battery.get_level(&env).unwrap(), -1.0);
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testLowPowerMode(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        let battery = NitroBattery::new(&env, application(&env)).unwrap();
        let shadow = shadow_service(&env, POWER_SERVICE, "PowerManager");

        env.call_method(shadow, "setIsPowerSaveMode", "(Z)V", &[true.into()])
            .unwrap();
        assert_eq!(battery.is_low_power_mode_enabled(&env).unwrap(), true);

        env.call_method(shadow, "setIsPowerSaveMode", "(Z)V", &[false.into()])
            .unwrap();
        assert_eq!(battery.is_low_power_mode_enabled(&env).unwrap(), false);
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testBatteryStateListener(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        let battery = NitroBattery::new(&env, application(&env)).unwrap();
        let (sender, mut receiver) = unbounded();

        let id = battery
            .add_battery_state_listener(
                &env,
                Arc::new(move |state: BatteryState| {
                    let _ = sender.unbounded_send(state);
                }),
            )
            .unwrap();
        assert_eq!(battery.listener_counts(), (1, 0));
        assert_eq!(battery.receivers_active(), (true, false));

        send_broadcast(&env, battery_intent(&env, BATTERY_STATUS_FULL));
        let state = async_std::task::block_on(async_std::future::timeout(
            EVENT_TIMEOUT,
            receiver.next(),
        ))
        .unwrap();
        assert_eq!(state, Some(BatteryState::Full));

        assert_eq!(battery.remove_battery_state_listener(&env, id).unwrap(), true);
        assert_eq!(battery.remove_battery_state_listener(&env, id).unwrap(), false);
        assert_eq!(battery.receivers_active(), (false, false));
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testLowPowerListener(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        let battery = NitroBattery::new(&env, application(&env)).unwrap();
        let (sender, mut receiver) = unbounded();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls2 = calls.clone();
        battery
            .add_low_power_listener(
                &env,
                Arc::new(move || {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    let _ = sender.unbounded_send(());
                }),
            )
            .unwrap();
        let second = battery
            .add_low_power_listener(&env, Arc::new(|| {}))
            .unwrap();
        assert_eq!(battery.listener_counts(), (0, 2));

        // Removing one of two listeners keeps the receiver.
        assert_eq!(battery.remove_low_power_listener(&env, second).unwrap(), true);
        assert_eq!(battery.receivers_active(), (false, true));

        send_broadcast(&env, new_intent(&env, ACTION_POWER_SAVE_MODE_CHANGED));
        let event = async_std::task::block_on(async_std::future::timeout(
            EVENT_TIMEOUT,
            receiver.next(),
        ))
        .unwrap();
        assert_eq!(event, Some(()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        battery.remove_all_listeners(&env).unwrap();
        assert_eq!(battery.listener_counts(), (0, 0));
        assert_eq!(battery.receivers_active(), (false, false));
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testOnLoad(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        let vm = env.get_java_vm().unwrap();
        let calls = AtomicUsize::new(0);

        let status = on_load(&vm, JniInterop, |v| {
            assert_eq!(v.get_java_vm_pointer(), vm.get_java_vm_pointer());
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(status, jint::from(JNIVersion::V6));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(env.exception_check().unwrap(), false);

        let status = on_load(&vm, JniInterop, |_| Err(Error::NullPtr("initialize")));
        assert_eq!(status, JNI_ERR);
        assert_eq!(env.exception_check().unwrap(), true);
        let ex = env.exception_occurred().unwrap();
        env.exception_clear().unwrap();
        assert!(env
            .is_instance_of(ex, "java/lang/UnsatisfiedLinkError")
            .unwrap());
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testSecondListenerHearsCurrentState(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        let battery = NitroBattery::new(&env, application(&env)).unwrap();
        send_sticky_status(&env, BATTERY_STATUS_CHARGING);

        let first = battery
            .add_battery_state_listener(&env, Arc::new(|_: BatteryState| {}))
            .unwrap();
        let (sender, mut receiver) = unbounded();
        let second = battery
            .add_battery_state_listener(
                &env,
                Arc::new(move |state: BatteryState| {
                    let _ = sender.unbounded_send(state);
                }),
            )
            .unwrap();

        // Delivered before the add returned.
        assert_eq!(receiver.try_next().unwrap(), Some(BatteryState::Charging));
        assert_eq!(battery.listener_counts(), (2, 0));

        assert_eq!(battery.remove_battery_state_listener(&env, first).unwrap(), true);
        assert_eq!(battery.receivers_active(), (true, false));
        assert_eq!(battery.remove_battery_state_listener(&env, second).unwrap(), true);
        assert_eq!(battery.receivers_active(), (false, false));
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testFailedRegistrationStopsEventThread(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        let baseline = running_event_threads();
        let context = env
            .new_object(
                "com/margelo/nitro/battery/ThrowingContext",
                "(Landroid/content/Context;)V",
                &[application(&env).into()],
            )
            .unwrap();
        let battery = NitroBattery::new(&env, context).unwrap();

        let result = battery.add_battery_state_listener(&env, Arc::new(|_: BatteryState| {}));
        assert!(matches!(result, Err(Error::JavaException)));
        take_exception(&env, "java/lang/SecurityException");

        let result = battery.add_low_power_listener(&env, Arc::new(|| {}));
        assert!(matches!(result, Err(Error::JavaException)));
        take_exception(&env, "java/lang/SecurityException");

        assert_eq!(battery.listener_counts(), (0, 0));
        assert_eq!(battery.receivers_active(), (false, false));

        async_std::task::block_on(async_std::future::timeout(EVENT_TIMEOUT, async {
            while running_event_threads() > baseline {
                async_std::task::sleep(Duration::from_millis(10)).await;
            }
        }))
        .unwrap();
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testBridge(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        send_sticky_status(&env, BATTERY_STATUS_CHARGING);
        let state = call_bridge(&env, "getBatteryState", "()Ljava/lang/String;", &[])
            .l()
            .unwrap();
        let state: String = env.get_string(state.into()).unwrap().into();
        assert_eq!(state, "charging");
        assert_eq!(call_bridge(&env, "isCharging", "()Z", &[]).z().unwrap(), true);

        let shadow = shadow_service(&env, BATTERY_SERVICE, "BatteryManager");
        env.call_method(
            shadow,
            "setIntProperty",
            "(II)V",
            &[BATTERY_PROPERTY_CAPACITY.into(), 73i32.into()],
        )
        .unwrap();
        assert_eq!(call_bridge(&env, "getLevel", "()D", &[]).d().unwrap(), 73.0);

        // A throwing listener ahead of a recording one.
        let throwing = env
            .new_object("com/margelo/nitro/battery/ThrowingConsumer", "()V", &[])
            .unwrap();
        let recording = env
            .new_object("com/margelo/nitro/battery/RecordingConsumer", "()V", &[])
            .unwrap();
        let sig = "(Ljava/util/function/Consumer;)J";
        let bad = call_bridge(&env, "addBatteryStateListener", sig, &[throwing.into()])
            .j()
            .unwrap();
        let good = call_bridge(&env, "addBatteryStateListener", sig, &[recording.into()])
            .j()
            .unwrap();
        assert_eq!(env.exception_check().unwrap(), false);
        assert_ne!(bad, good);
        assert_eq!(next_state(&env, recording).as_deref(), Some("charging"));

        send_broadcast(&env, battery_intent(&env, BATTERY_STATUS_FULL));
        loop {
            match next_state(&env, recording).as_deref() {
                Some("full") => break,
                Some(_) => {}
                None => panic!("no full state delivered"),
            }
        }

        assert_eq!(
            call_bridge(&env, "removeBatteryStateListener", "(J)Z", &[good.into()])
                .z()
                .unwrap(),
            true
        );
        assert_eq!(
            call_bridge(&env, "removeBatteryStateListener", "(J)Z", &[good.into()])
                .z()
                .unwrap(),
            false
        );

        let runnable = env
            .new_object("com/margelo/nitro/battery/CountingRunnable", "()V", &[])
            .unwrap();
        let low_power = call_bridge(
            &env,
            "addLowPowerListener",
            "(Ljava/lang/Runnable;)J",
            &[runnable.into()],
        )
        .j()
        .unwrap();
        send_broadcast(&env, new_intent(&env, ACTION_POWER_SAVE_MODE_CHANGED));
        let ran = env
            .call_method(runnable, "await", "(J)Z", &[timeout_millis().into()])
            .unwrap()
            .z()
            .unwrap();
        assert_eq!(ran, true);

        call_bridge(&env, "removeAllListeners", "()V", &[]);
        assert_eq!(
            call_bridge(&env, "removeLowPowerListener", "(J)Z", &[low_power.into()])
                .z()
                .unwrap(),
            false
        );
        assert_eq!(
            call_bridge(&env, "removeBatteryStateListener", "(J)Z", &[bad.into()])
                .z()
                .unwrap(),
            false
        );
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testNullApplication(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        let result = NitroBattery::from_application(&env, JObject::null());
        assert!(matches!(result, Err(Error::JavaException)));
        take_exception(&env, "java/lang/IllegalStateException");
    });
}

#[no_mangle]
pub extern "C" fn Java_com_margelo_nitro_battery_BatteryTest_testThrowError(
    env: JNIEnv,
    _obj: JObject,
) {
    let _ = throw_unwind(&env, || {
        throw_error(&env, Error::NullPtr("level"));
        take_exception(&env, "java/lang/RuntimeException");

        throw_error(&env, Error::JavaException);
        assert_eq!(env.exception_check().unwrap(), false);

        // An exception that is already pending is left alone.
        env.throw_new("java/lang/IllegalArgumentException", "first")
            .unwrap();
        throw_error(&env, Error::NullPtr("level"));
        take_exception(&env, "java/lang/IllegalArgumentException");
    });
}
