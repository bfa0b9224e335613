use crate::{
    battery::{
        self, BatteryState, JContext, ACTION_BATTERY_CHANGED, ACTION_POWER_SAVE_MODE_CHANGED,
    },
    bridge,
    listener::{ListenerId, ListenerRegistry},
    receiver,
};
use futures::{executor::block_on, Stream, StreamExt};
use jni::{
    errors::{Error, Result},
    objects::{GlobalRef, JObject},
    JNIEnv, JavaVM,
};
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
};

/// Called with the new state whenever the battery state changes.
pub type BatteryStateListener = dyn Fn(BatteryState) + Send + Sync;

/// Called whenever power-save mode is switched on or off.
pub type LowPowerListener = dyn Fn() + Send + Sync;

/// Module initializer run by `JNI_OnLoad`. Registers the native methods of
/// `NativeBattery`.
pub fn initialize(vm: &JavaVM) -> Result<()> {
    let env = vm.get_env()?;
    bridge::register(&env)?;
    info!("battery module initialized");
    Ok(())
}

static INSTANCE: OnceCell<NitroBattery> = OnceCell::new();

static EVENT_THREADS: AtomicUsize = AtomicUsize::new(0);

/// Number of event threads that have been started and not yet finished.
pub fn running_event_threads() -> usize {
    EVENT_THREADS.load(Ordering::SeqCst)
}

struct EventThreadCount;

impl EventThreadCount {
    fn acquire() -> Self {
        EVENT_THREADS.fetch_add(1, Ordering::SeqCst);
        Self
    }
}

impl Drop for EventThreadCount {
    fn drop(&mut self) {
        EVENT_THREADS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Broadcast receiver for one action, plus the listeners it feeds.
struct Watch<L: ?Sized> {
    action: &'static str,
    listeners: Arc<ListenerRegistry<L>>,
    receiver: Mutex<Option<GlobalRef>>,
}

impl<L: ?Sized + Send + Sync + 'static> Watch<L> {
    fn new(action: &'static str) -> Self {
        Self {
            action,
            listeners: Arc::new(ListenerRegistry::new()),
            receiver: Mutex::new(None),
        }
    }

    fn lock_receiver(&self) -> MutexGuard<'_, Option<GlobalRef>> {
        self.receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a listener, registering the receiver if this is the first one.
    /// The flag is `true` if this call registered the receiver.
    fn add<F>(
        &self,
        env: &JNIEnv,
        context: &GlobalRef,
        listener: Arc<L>,
        dispatch: F,
    ) -> Result<(ListenerId, bool)>
    where
        F: Fn(&JNIEnv, &GlobalRef, &[Arc<L>]) + Send + 'static,
    {
        let mut active = self.lock_receiver();
        let id = self.listeners.add(listener);
        let start = active.is_none();
        if start {
            let listeners = self.listeners.clone();
            let started = start_receiver(env, context, self.action, move |env, intent| {
                dispatch(env, intent, &listeners.snapshot())
            });
            match started {
                Ok(receiver) => *active = Some(receiver),
                Err(e) => {
                    self.listeners.remove(id);
                    return Err(e);
                }
            }
        }
        Ok((id, start))
    }

    /// Remove a listener, unregistering the receiver if it was the last one.
    fn remove(&self, env: &JNIEnv, context: &GlobalRef, id: ListenerId) -> Result<bool> {
        let mut active = self.lock_receiver();
        let removed = self.listeners.remove(id);
        if removed && self.listeners.is_empty() {
            if let Some(receiver) = active.take() {
                stop_receiver(env, context, &receiver)?;
            }
        }
        Ok(removed)
    }

    fn clear(&self, env: &JNIEnv, context: &GlobalRef) -> Result<()> {
        let mut active = self.lock_receiver();
        self.listeners.clear();
        if let Some(receiver) = active.take() {
            stop_receiver(env, context, &receiver)?;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.lock_receiver().is_some()
    }
}

fn start_receiver<F>(
    env: &JNIEnv,
    context: &GlobalRef,
    action: &'static str,
    on_intent: F,
) -> Result<GlobalRef>
where
    F: Fn(&JNIEnv, &GlobalRef) + Send + 'static,
{
    let ctx = JContext::from_env(env, context.as_obj())?;
    let vm = env.get_java_vm()?;

    let (obj, stream) = receiver::async_broadcast_receiver(env)?;
    let global = env.new_global_ref(obj);
    let _ = env.delete_local_ref(obj);
    let receiver = global?;

    let count = EventThreadCount::acquire();
    let spawned = thread::Builder::new()
        .name("nitro-battery-events".to_owned())
        .spawn(move || {
            let _count = count;
            pump(vm, action, stream, on_intent)
        });
    if let Err(e) = spawned {
        let _ = receiver::close_receiver(env, receiver.as_obj());
        if !env.exception_check().unwrap_or(true) {
            env.throw_new(
                "java/lang/IllegalStateException",
                format!("failed to start event thread: {}", e),
            )?;
        }
        return Err(Error::JavaException);
    }

    // From here on the event thread is running; every failure must close the
    // stream so it exits.
    match ctx.register_receiver(receiver.as_obj(), action) {
        Ok(sticky) => {
            let _ = env.delete_local_ref(sticky);
            debug!("registered receiver for {}", action);
            Ok(receiver)
        }
        Err(e) => {
            let _ = receiver::close_receiver(env, receiver.as_obj());
            Err(e)
        }
    }
}

fn stop_receiver(env: &JNIEnv, context: &GlobalRef, receiver: &GlobalRef) -> Result<()> {
    let ctx = JContext::from_env(env, context.as_obj())?;
    let unregistered = ctx.unregister_receiver(receiver.as_obj());
    receiver::close_receiver(env, receiver.as_obj())?;
    debug!("unregistered receiver");
    unregistered
}

/// Body of an event thread: drain the receiver stream until it is closed.
fn pump<S, F>(vm: JavaVM, action: &str, stream: S, on_intent: F)
where
    S: Stream<Item = Result<GlobalRef>>,
    F: Fn(&JNIEnv, &GlobalRef),
{
    let env = match vm.attach_current_thread_permanently() {
        Ok(env) => env,
        Err(e) => {
            warn!("could not attach event thread for {}: {}", action, e);
            return;
        }
    };

    let mut stream = Box::pin(stream);
    block_on(async {
        while let Some(intent) = stream.next().await {
            match intent {
                Ok(intent) => on_intent(&env, &intent),
                Err(e) => warn!("bad event for {}: {}", action, e),
            }
            if env.exception_check().unwrap_or(false) {
                let _ = env.exception_describe();
                let _ = env.exception_clear();
                warn!("listener for {} threw", action);
            }
        }
    });
    debug!("event thread for {} finished", action);
}

/// Battery and power-save state of the device, plus change listeners.
///
/// A process-wide instance backs `NativeBattery`; see [`NitroBattery::global()`].
/// Dropping an instance unregisters its receivers.
pub struct NitroBattery {
    vm: JavaVM,
    context: GlobalRef,
    battery: Watch<BatteryStateListener>,
    low_power: Watch<LowPowerListener>,
}

impl NitroBattery {
    /// Create an instance that reads state through `context`.
    ///
    /// # Arguments
    ///
    /// * `env` - Java environment to use.
    /// * `context` - `android.content.Context` to use. Usually the application.
    pub fn new<'a: 'b, 'b>(env: &'b JNIEnv<'a>, context: JObject<'a>) -> Result<Self> {
        Ok(Self {
            vm: env.get_java_vm()?,
            context: env.new_global_ref(context)?,
            battery: Watch::new(ACTION_BATTERY_CHANGED),
            low_power: Watch::new(ACTION_POWER_SAVE_MODE_CHANGED),
        })
    }

    /// Like [`NitroBattery::new()`], but fails with a pending
    /// `IllegalStateException` if `app` is null.
    ///
    /// # Arguments
    ///
    /// * `env` - Java environment to use.
    /// * `app` - The `android.app.Application`, possibly null.
    pub fn from_application<'a: 'b, 'b>(env: &'b JNIEnv<'a>, app: JObject<'a>) -> Result<Self> {
        if app.is_null() {
            env.throw_new(
                "java/lang/IllegalStateException",
                "application context is null",
            )?;
            return Err(Error::JavaException);
        }
        Self::new(env, app)
    }

    /// Get the process-wide instance, creating it from
    /// `ActivityThread.currentApplication()` on first use. Fails with a
    /// pending `IllegalStateException` if there is no application yet.
    pub fn global<'a: 'b, 'b>(env: &'b JNIEnv<'a>) -> Result<&'static NitroBattery> {
        INSTANCE.get_or_try_init(|| {
            let app = env
                .call_static_method(
                    "android/app/ActivityThread",
                    "currentApplication",
                    "()Landroid/app/Application;",
                    &[],
                )?
                .l()?;
            let app = env.auto_local(app);
            Self::from_application(env, app.as_obj())
        })
    }

    /// Battery level in percent, or `-1.0` if unavailable.
    pub fn get_level(&self, env: &JNIEnv) -> Result<f64> {
        battery::level(&JContext::from_env(env, self.context.as_obj())?)
    }

    pub fn is_charging(&self, env: &JNIEnv) -> Result<bool> {
        battery::is_charging(&JContext::from_env(env, self.context.as_obj())?)
    }

    pub fn get_battery_state(&self, env: &JNIEnv) -> Result<BatteryState> {
        battery::battery_state(&JContext::from_env(env, self.context.as_obj())?)
    }

    pub fn is_low_power_mode_enabled(&self, env: &JNIEnv) -> Result<bool> {
        battery::is_low_power_mode_enabled(&JContext::from_env(env, self.context.as_obj())?)
    }

    /// Add a listener for battery state changes. The first listener
    /// registers a receiver for `ACTION_BATTERY_CHANGED`, and since that
    /// broadcast is sticky the receiver reports the current state right away.
    /// Listeners added while the receiver is already registered are instead
    /// called once with the current state, on the calling thread, before this
    /// returns.
    ///
    /// State changes are delivered on a dedicated event thread.
    pub fn add_battery_state_listener(
        &self,
        env: &JNIEnv,
        listener: Arc<BatteryStateListener>,
    ) -> Result<ListenerId> {
        let (id, started) = self.battery.add(
            env,
            &self.context,
            listener.clone(),
            |env: &JNIEnv, intent: &GlobalRef, listeners: &[Arc<BatteryStateListener>]| {
                let state = match battery::status_from_intent(env, intent.as_obj()) {
                    Ok(status) => BatteryState::from_status(status),
                    Err(e) => {
                        warn!("could not read battery status: {}", e);
                        return;
                    }
                };
                debug!("battery state is {}", state);
                for listener in listeners {
                    listener(state);
                }
            },
        )?;
        if !started {
            match self.get_battery_state(env) {
                Ok(state) => listener(state),
                Err(e) => {
                    self.battery.listeners.remove(id);
                    return Err(e);
                }
            }
        }
        Ok(id)
    }

    /// Remove a battery state listener. Returns `false` if `id` is unknown.
    pub fn remove_battery_state_listener(&self, env: &JNIEnv, id: ListenerId) -> Result<bool> {
        self.battery.remove(env, &self.context, id)
    }

    /// Add a listener for power-save mode changes. Listeners are called on
    /// every change, whichever way it goes.
    pub fn add_low_power_listener(
        &self,
        env: &JNIEnv,
        listener: Arc<LowPowerListener>,
    ) -> Result<ListenerId> {
        let (id, _) = self.low_power.add(
            env,
            &self.context,
            listener,
            |_env: &JNIEnv, _intent: &GlobalRef, listeners: &[Arc<LowPowerListener>]| {
                debug!("power save mode changed");
                for listener in listeners {
                    listener();
                }
            },
        )?;
        Ok(id)
    }

    /// Remove a low-power listener. Returns `false` if `id` is unknown.
    pub fn remove_low_power_listener(&self, env: &JNIEnv, id: ListenerId) -> Result<bool> {
        self.low_power.remove(env, &self.context, id)
    }

    /// Remove every listener of both kinds and unregister the receivers.
    pub fn remove_all_listeners(&self, env: &JNIEnv) -> Result<()> {
        let battery = self.battery.clear(env, &self.context);
        let low_power = self.low_power.clear(env, &self.context);
        battery.and(low_power)
    }

    /// Number of battery state and low-power listeners currently registered.
    pub fn listener_counts(&self) -> (usize, usize) {
        (self.battery.listeners.len(), self.low_power.listeners.len())
    }

    /// Whether the battery and power-save receivers are registered.
    pub fn receivers_active(&self) -> (bool, bool) {
        (self.battery.is_active(), self.low_power.is_active())
    }
}

impl Drop for NitroBattery {
    fn drop(&mut self) {
        if !self.battery.is_active() && !self.low_power.is_active() {
            return;
        }
        match self.vm.attach_current_thread() {
            Ok(env) => {
                if let Err(e) = self.remove_all_listeners(&env) {
                    warn!("could not unregister receivers: {}", e);
                }
            }
            Err(e) => warn!("could not attach to unregister receivers: {}", e),
        }
    }
}
