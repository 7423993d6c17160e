/// Default topic namespace for boiler state and commands.
pub const DEFAULT_PREFIX: &str = "home/boiler";

/// Default Home Assistant discovery prefix.
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Default discovery node id grouping all boiler entities.
pub const DEFAULT_GROUP_ID: &str = "boiler";

/// Builder for the bridge's MQTT topics.
///
/// Topics follow the patterns:
/// - `<prefix>/<name>/state` (retained state)
/// - `<prefix>/<name>/set` (commands)
/// - `<discovery_prefix>/<component>/<group_id>/<name>/config` (discovery)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    prefix: String,
    discovery_prefix: String,
    group_id: String,
}

impl Default for TopicBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_DISCOVERY_PREFIX, DEFAULT_GROUP_ID)
    }
}

impl TopicBuilder {
    /// Create a topic builder.
    pub fn new(
        prefix: impl Into<String>,
        discovery_prefix: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            discovery_prefix: discovery_prefix.into().trim_end_matches('/').to_string(),
            group_id: group_id.into(),
        }
    }

    /// The state/command namespace.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Base path of one entity, used as the `~` abbreviation in discovery payloads.
    ///
    /// # Example
    /// ```
    /// use bsb_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::default();
    /// assert_eq!(topics.base("boiler_temp"), "home/boiler/boiler_temp");
    /// ```
    pub fn base(&self, name: &str) -> String {
        format!("{}/{}", self.prefix, name)
    }

    /// Retained state topic of one entity.
    ///
    /// # Example
    /// ```
    /// use bsb_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::default();
    /// assert_eq!(topics.state("boiler_temp"), "home/boiler/boiler_temp/state");
    /// ```
    pub fn state(&self, name: &str) -> String {
        format!("{}/{}/state", self.prefix, name)
    }

    /// Command topic of one entity.
    pub fn set(&self, name: &str) -> String {
        format!("{}/{}/set", self.prefix, name)
    }

    /// Discovery config topic of one entity.
    ///
    /// # Example
    /// ```
    /// use bsb_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::default();
    /// assert_eq!(
    ///     topics.discovery("number", "room1_temp_req"),
    ///     "homeassistant/number/boiler/room1_temp_req/config"
    /// );
    /// ```
    pub fn discovery(&self, component: &str, name: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix, component, self.group_id, name
        )
    }

    /// Subscription filter covering the whole namespace.
    pub fn namespace_wildcard(&self) -> String {
        format!("{}/#", self.prefix)
    }

    /// Bridge availability topic.
    pub fn status(&self) -> String {
        format!("{}/status", self.prefix)
    }

    /// Extract the entity name from a command topic.
    ///
    /// Returns `None` for anything that is not `<prefix>/<name>/set` with a
    /// single, non-empty name level.
    ///
    /// # Example
    /// ```
    /// use bsb_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::default();
    /// assert_eq!(topics.parse_set("home/boiler/hc2_enabled/set"), Some("hc2_enabled"));
    /// assert_eq!(topics.parse_set("home/boiler/hc2_enabled/state"), None);
    /// ```
    pub fn parse_set<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let name = rest.strip_suffix("/set")?;

        if name.is_empty() || name.contains('/') {
            return None;
        }

        Some(name)
    }
}
