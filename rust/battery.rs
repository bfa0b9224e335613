use jni::{
    errors::{Error, Result},
    objects::{JMethodID, JObject},
    signature::{JavaType, Primitive},
    JNIEnv,
};
use std::{fmt, str::FromStr};

/// `android.os.BatteryManager.BATTERY_STATUS_UNKNOWN`
pub const BATTERY_STATUS_UNKNOWN: i32 = 1;

/// `android.os.BatteryManager.BATTERY_STATUS_CHARGING`
pub const BATTERY_STATUS_CHARGING: i32 = 2;

/// `android.os.BatteryManager.BATTERY_STATUS_DISCHARGING`
pub const BATTERY_STATUS_DISCHARGING: i32 = 3;

/// `android.os.BatteryManager.BATTERY_STATUS_NOT_CHARGING`
pub const BATTERY_STATUS_NOT_CHARGING: i32 = 4;

/// `android.os.BatteryManager.BATTERY_STATUS_FULL`
pub const BATTERY_STATUS_FULL: i32 = 5;

/// `android.os.BatteryManager.BATTERY_PROPERTY_CAPACITY`
pub const BATTERY_PROPERTY_CAPACITY: i32 = 4;

/// `android.os.BatteryManager.EXTRA_STATUS`
pub const EXTRA_STATUS: &str = "status";

/// `android.content.Intent.ACTION_BATTERY_CHANGED`
pub const ACTION_BATTERY_CHANGED: &str = "android.intent.action.BATTERY_CHANGED";

/// `android.os.PowerManager.ACTION_POWER_SAVE_MODE_CHANGED`
pub const ACTION_POWER_SAVE_MODE_CHANGED: &str = "android.os.action.POWER_SAVE_MODE_CHANGED";

/// `android.content.Context.BATTERY_SERVICE`
pub const BATTERY_SERVICE: &str = "batterymanager";

/// `android.content.Context.POWER_SERVICE`
pub const POWER_SERVICE: &str = "power";

/// Charging state of the battery, as reported to listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatteryState {
    Charging,
    Full,
    Discharging,
    Unknown,
}

impl BatteryState {
    /// Map an `android.os.BatteryManager` status code. Codes without a
    /// counterpart, including "not charging" and a missing status, map to
    /// [`BatteryState::Unknown`].
    pub fn from_status(status: i32) -> Self {
        match status {
            BATTERY_STATUS_CHARGING => Self::Charging,
            BATTERY_STATUS_FULL => Self::Full,
            BATTERY_STATUS_DISCHARGING => Self::Discharging,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Charging => "charging",
            Self::Full => "full",
            Self::Discharging => "discharging",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the device is plugged in and either charging or topped up.
    pub fn is_charging(self) -> bool {
        matches!(self, Self::Charging | Self::Full)
    }
}

impl fmt::Display for BatteryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a string that is not a [`BatteryState`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseBatteryStateError(String);

impl fmt::Display for ParseBatteryStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown battery state `{}`", self.0)
    }
}

impl std::error::Error for ParseBatteryStateError {}

impl FromStr for BatteryState {
    type Err = ParseBatteryStateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "charging" => Ok(Self::Charging),
            "full" => Ok(Self::Full),
            "discharging" => Ok(Self::Discharging),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseBatteryStateError(s.to_owned())),
        }
    }
}

/// Clamp a `BATTERY_PROPERTY_CAPACITY` reading to a percentage. Devices that
/// do not support the property report `Integer.MIN_VALUE` or garbage; those
/// become `-1.0`.
pub fn capacity_to_level(capacity: i32) -> f64 {
    if (0..=100).contains(&capacity) {
        capacity as f64
    } else {
        -1.0
    }
}

/// Wrapper for [`JObject`]s that contain `android.content.Context`. Provides
/// the handful of `Context` methods needed to query battery and power state.
///
/// Looks up the class and method IDs on creation rather than for every method
/// call.
pub struct JContext<'a: 'b, 'b> {
    internal: JObject<'a>,
    get_system_service: JMethodID<'a>,
    register_receiver: JMethodID<'a>,
    unregister_receiver: JMethodID<'a>,
    env: &'b JNIEnv<'a>,
}

impl<'a: 'b, 'b> JContext<'a, 'b> {
    /// Create a [`JContext`] from the environment and an object. This looks up
    /// the necessary class and method IDs to call all of the methods on it so
    /// that extra work doesn't need to be done on every method call.
    ///
    /// # Arguments
    ///
    /// * `env` - Java environment to use.
    /// * `obj` - Object to wrap.
    pub fn from_env(env: &'b JNIEnv<'a>, obj: JObject<'a>) -> Result<Self> {
        let class = env.auto_local(env.find_class("android/content/Context")?);

        let get_system_service = env.get_method_id(
            &class,
            "getSystemService",
            "(Ljava/lang/String;)Ljava/lang/Object;",
        )?;
        let register_receiver = env.get_method_id(
            &class,
            "registerReceiver",
            "(Landroid/content/BroadcastReceiver;Landroid/content/IntentFilter;)Landroid/content/Intent;",
        )?;
        let unregister_receiver = env.get_method_id(
            &class,
            "unregisterReceiver",
            "(Landroid/content/BroadcastReceiver;)V",
        )?;
        Ok(Self {
            internal: obj,
            get_system_service,
            register_receiver,
            unregister_receiver,
            env,
        })
    }

    /// Get the wrapped `Context`.
    pub fn as_obj(&self) -> JObject<'a> {
        self.internal
    }

    /// Call `Context.getSystemService(String)`. Fails with
    /// [`Error::NullDeref`] if the service does not exist.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the service.
    pub fn get_system_service(&self, name: &str) -> Result<JObject<'a>> {
        let name = self.env.auto_local(self.env.new_string(name)?);
        let service = self
            .env
            .call_method_unchecked(
                self.internal,
                self.get_system_service,
                JavaType::Object("java/lang/Object".into()),
                &[name.as_obj().into()],
            )?
            .l()?;
        if service.is_null() {
            return Err(Error::NullDeref("Context.getSystemService()"));
        }
        Ok(service)
    }

    /// Call `Context.registerReceiver(BroadcastReceiver, IntentFilter)` with
    /// a filter for a single action. Returns the current sticky intent for
    /// the action, which may be null.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Receiver to register. May be null to only fetch the
    ///   sticky intent.
    /// * `action` - Action to filter on.
    pub fn register_receiver(&self, receiver: JObject<'a>, action: &str) -> Result<JObject<'a>> {
        let action = self.env.auto_local(self.env.new_string(action)?);
        let filter = self.env.auto_local(self.env.new_object(
            "android/content/IntentFilter",
            "(Ljava/lang/String;)V",
            &[action.as_obj().into()],
        )?);
        self.env
            .call_method_unchecked(
                self.internal,
                self.register_receiver,
                JavaType::Object("android/content/Intent".into()),
                &[receiver.into(), filter.as_obj().into()],
            )?
            .l()
    }

    /// Call `Context.unregisterReceiver(BroadcastReceiver)`.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Receiver to unregister.
    pub fn unregister_receiver(&self, receiver: JObject<'a>) -> Result<()> {
        self.env.call_method_unchecked(
            self.internal,
            self.unregister_receiver,
            JavaType::Primitive(Primitive::Void),
            &[receiver.into()],
        )?;
        Ok(())
    }
}

/// Read the battery level in percent via
/// `BatteryManager.getIntProperty(BATTERY_PROPERTY_CAPACITY)`. Returns `-1.0`
/// if the level is unavailable.
pub fn level(ctx: &JContext) -> Result<f64> {
    let env = ctx.env;
    let manager = env.auto_local(ctx.get_system_service(BATTERY_SERVICE)?);
    let capacity = env
        .call_method(
            manager.as_obj(),
            "getIntProperty",
            "(I)I",
            &[BATTERY_PROPERTY_CAPACITY.into()],
        )?
        .i()?;
    Ok(capacity_to_level(capacity))
}

/// Read `BatteryManager.EXTRA_STATUS` from an `ACTION_BATTERY_CHANGED`
/// intent. Returns `-1` if the intent is null or has no status.
///
/// # Arguments
///
/// * `env` - Java environment to use.
/// * `intent` - Intent to read.
pub fn status_from_intent<'a: 'b, 'b>(env: &'b JNIEnv<'a>, intent: JObject<'a>) -> Result<i32> {
    if intent.is_null() {
        return Ok(-1);
    }
    let key = env.auto_local(env.new_string(EXTRA_STATUS)?);
    env.call_method(
        intent,
        "getIntExtra",
        "(Ljava/lang/String;I)I",
        &[key.as_obj().into(), (-1i32).into()],
    )?
    .i()
}

/// Read the current battery status code from the sticky
/// `ACTION_BATTERY_CHANGED` intent.
pub fn status(ctx: &JContext) -> Result<i32> {
    let env = ctx.env;
    let intent = env.auto_local(ctx.register_receiver(JObject::null(), ACTION_BATTERY_CHANGED)?);
    status_from_intent(env, intent.as_obj())
}

/// Read the current [`BatteryState`].
pub fn battery_state(ctx: &JContext) -> Result<BatteryState> {
    Ok(BatteryState::from_status(status(ctx)?))
}

/// Whether the device is charging or full.
pub fn is_charging(ctx: &JContext) -> Result<bool> {
    Ok(battery_state(ctx)?.is_charging())
}

/// Call `PowerManager.isPowerSaveMode()`.
pub fn is_low_power_mode_enabled(ctx: &JContext) -> Result<bool> {
    let env = ctx.env;
    let manager = env.auto_local(ctx.get_system_service(POWER_SERVICE)?);
    env.call_method(manager.as_obj(), "isPowerSaveMode", "()Z", &[])?
        .z()
}
