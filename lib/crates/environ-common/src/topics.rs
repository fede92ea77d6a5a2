/// Bus channel layout for environ agents
pub mod channels {
    /// Namespace tag carried as the first segment of every event name.
    /// Format: env.{operation}
    pub const NAMESPACE: &str = "env";

    /// Separator between channel prefix, node name and event.
    /// Format: {prefix}:{node_name}:env.{operation}
    pub const SEPARATOR: char = ':';

    /// Suffix appended to the master name to form the node name.
    /// Every agent of one master shares it, so a single publish fans out.
    pub const NODE_SUFFIX: &str = "_minion";
}

/// Node name for agents managed by `master_name`.
pub fn node_name(master_name: &str) -> String {
    format!("{}{}", master_name, channels::NODE_SUFFIX)
}

/// Glob pattern an agent subscribes to.
pub fn subscription_pattern(prefix: &str, node_name: &str) -> String {
    format!(
        "{prefix}{sep}{node_name}{sep}{ns}.*",
        sep = channels::SEPARATOR,
        ns = channels::NAMESPACE
    )
}

/// Event name (`env.<operation>`) carried by a channel.
///
/// The event is everything after the last separator, so prefixes may
/// themselves contain `:`.
pub fn event_from_channel(channel: &str) -> &str {
    channel
        .rsplit_once(channels::SEPARATOR)
        .map_or(channel, |(_, event)| event)
}

/// Operation name of an event: the second dot-delimited segment.
///
/// Returns an empty string when the event has no `.`; the dispatcher
/// rejects that like any other unknown name.
pub fn operation_name(event: &str) -> &str {
    event.split('.').nth(1).unwrap_or("")
}
