use futures::Stream;
use jni::{
    errors::Result,
    objects::{GlobalRef, JObject},
    JNIEnv,
};
use jni_utils::stream::{JSendStream, JStream};
use std::convert::TryFrom;

/// Java class backing [`async_broadcast_receiver()`].
pub const RECEIVER_CLASS: &str = "com/margelo/nitro/battery/RustBroadcastReceiver";

/// Creates an `android.content.BroadcastReceiver` and an accompanying stream
/// of the `android.content.Intent`s it receives.
///
/// The stream ends once [`close_receiver()`] is called on the receiver.
///
/// # Arguments
///
/// * `env` - Java environment to use.
pub fn async_broadcast_receiver<'a: 'b, 'b>(
    env: &'b JNIEnv<'a>,
) -> Result<(JObject<'a>, impl Stream<Item = Result<GlobalRef>> + Send)> {
    let receiver = env.new_object(RECEIVER_CLASS, "()V", &[])?;
    let stream = env
        .call_method(
            receiver,
            "getEventStream",
            "()Lio/github/gedgygedgy/rust/stream/Stream;",
            &[],
        )?
        .l()?;
    let stream = JSendStream::try_from(JStream::from_env(env, stream)?)?;

    Ok((receiver, stream))
}

/// Finish the stream of a receiver created by [`async_broadcast_receiver()`].
/// Intents delivered after this are dropped.
///
/// # Arguments
///
/// * `env` - Java environment to use.
/// * `receiver` - Receiver to close.
pub fn close_receiver<'a: 'b, 'b>(env: &'b JNIEnv<'a>, receiver: JObject<'a>) -> Result<()> {
    env.call_method(receiver, "close", "()V", &[])?;
    Ok(())
}
