use std::time::Duration;

/// Runtime configuration for channels, waiters and the scenario runner.
///
/// Use the builder methods to customize, or [`Default`] for sensible
/// defaults.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use parley::Config;
///
/// let config = Config::default()
///     .with_strict_topics(true)                         // flag unhandled topics
///     .with_scenario_timeout(Duration::from_secs(60))   // slow peers
///     .with_poll_interval(Duration::from_millis(5));    // tighter waiter loop
///
/// assert!(config.strict_topics());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Buffer size of each direction of a channel.
    /// Senders wait for space when the buffer is full.
    /// Default: 128
    channel_capacity: usize,

    /// Whether a message nobody is waiting for is an error
    /// ([`Error::UnexpectedTopic`](crate::Error::UnexpectedTopic)) instead
    /// of being dropped.
    /// Default: false
    strict_topics: bool,

    /// How long a scenario may run before it is reported as timed out.
    /// Default: 30s
    scenario_timeout: Duration,

    /// Default bound for [`wait_for`](crate::wait_for) conditions.
    /// Default: 5s
    wait_timeout: Duration,

    /// How often a polling waiter re-evaluates its predicate.
    /// Default: 10ms
    poll_interval: Duration,

    /// Quiet period after which [`Channel::drain`](crate::Channel::drain)
    /// considers a channel settled.
    /// Default: 1ms
    settle_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            channel_capacity: 128,
            strict_topics: false,
            scenario_timeout: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            settle_window: Duration::from_millis(1),
        }
    }
}

impl Config {
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Flag messages that arrive with no handler or pending request.
    pub fn with_strict_topics(mut self, strict: bool) -> Self {
        self.strict_topics = strict;
        self
    }

    pub fn strict_topics(&self) -> bool {
        self.strict_topics
    }

    pub fn with_scenario_timeout(mut self, timeout: Duration) -> Self {
        self.scenario_timeout = timeout;
        self
    }

    pub fn scenario_timeout(&self) -> Duration {
        self.scenario_timeout
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Set how often polling waiters re-check their condition.
    ///
    /// Trade-offs:
    /// - Short intervals react faster but burn more wakeups
    /// - Long intervals can add up to one interval of latency per wait
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn with_settle_window(mut self, window: Duration) -> Self {
        self.settle_window = window;
        self
    }

    pub fn settle_window(&self) -> Duration {
        self.settle_window
    }
}
