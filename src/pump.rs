/// A cooperative event loop that has to be driven by hand.
///
/// `pump_once` processes at least one pending event if one is available, or
/// blocks briefly when there is nothing to do. It reports whether any event
/// ran. Completions delivered by the host run on the calling thread from
/// inside this method.
pub trait EventPump {
    fn pump_once(&self) -> bool;

    /// Pump until the loop reports no more progress.
    fn pump_until_idle(&self) -> usize {
        let mut processed = 0;
        while self.pump_once() {
            processed += 1;
        }
        processed
    }
}
