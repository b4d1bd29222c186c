// src/location.rs

//! Feature-pack location model
//!
//! Locations identify where a feature pack comes from using the format:
//! `producer[@universe]:channel[/frequency][#build]`
//!
//! Examples:
//! - `wildfly@community:current/final#1.0.0` - build 1.0.0 of wildfly on the
//!   current channel of the community universe
//! - `keycloak:10#10.0.2` - build 10.0.2 on channel 10 of the default universe
//! - `mysite:stable` - latest build on the stable channel
//!
//! # Location Components
//!
//! - **Universe**: a named source of producers, `factory[(location)]`
//! - **Producer**: the identity of a feature-pack stream, independent of version
//! - **Channel**: a named series of builds within a producer
//! - **Frequency**: an optional release-frequency qualifier within a channel
//! - **Build**: a specific version stamp on a channel
//!
//! A location may instead carry raw artifact coordinates
//! (`group:artifact:version`); such a *coordinate-form* location has no
//! universe and no channel and must be normalized through resolution before
//! it can participate in version convergence.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A universe specification: the factory that knows how to open the universe
/// and an optional factory-specific location string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniverseSpec {
    factory: String,
    location: Option<String>,
}

impl UniverseSpec {
    pub fn new(factory: impl Into<String>, location: Option<String>) -> Self {
        Self {
            factory: factory.into(),
            location,
        }
    }

    /// Universe with a factory name only
    pub fn forge(factory: impl Into<String>) -> Self {
        Self::new(factory, None)
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(syntax(s, "empty universe"));
        }
        match s.find('(') {
            None => {
                validate_component(s, s, "universe factory")?;
                Ok(Self::new(s, None))
            }
            Some(open) => {
                if !s.ends_with(')') {
                    return Err(syntax(s, "universe location is missing ')'"));
                }
                let factory = &s[..open];
                let location = &s[open + 1..s.len() - 1];
                validate_component(s, factory, "universe factory")?;
                if location.is_empty() {
                    return Err(syntax(s, "empty universe location"));
                }
                Ok(Self::new(factory, Some(location.to_string())))
            }
        }
    }
}

impl fmt::Display for UniverseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}({})", self.factory, location),
            None => write!(f, "{}", self.factory),
        }
    }
}

impl FromStr for UniverseSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        UniverseSpec::parse(s)
    }
}

/// The identity of a feature-pack stream: universe plus producer name.
///
/// Membership in the installed set is keyed by this type; channel and build
/// are deliberately excluded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerSpec {
    universe: Option<UniverseSpec>,
    name: String,
}

impl ProducerSpec {
    pub fn new(universe: Option<UniverseSpec>, name: impl Into<String>) -> Self {
        Self {
            universe,
            name: name.into(),
        }
    }

    pub fn universe(&self) -> Option<&UniverseSpec> {
        self.universe.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A location addressing this producer with no channel or build
    pub fn location(&self) -> FeaturePackLocation {
        FeaturePackLocation::new(self.universe.clone(), self.name.clone(), None, None, None)
    }
}

impl fmt::Display for ProducerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.universe {
            Some(u) => write!(f, "{}@{}", self.name, u),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A feature-pack id: a location narrowed to producer, channel and build.
///
/// Frequency never participates in identity. A fully concrete id carries a
/// build; ids used as branch pins during traversal may be channel-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FpId {
    universe: Option<UniverseSpec>,
    producer: String,
    channel: Option<String>,
    build: Option<String>,
}

impl FpId {
    pub fn new(
        universe: Option<UniverseSpec>,
        producer: impl Into<String>,
        channel: Option<String>,
        build: Option<String>,
    ) -> Self {
        Self {
            universe,
            producer: producer.into(),
            channel,
            build,
        }
    }

    pub fn producer(&self) -> ProducerSpec {
        ProducerSpec::new(self.universe.clone(), self.producer.clone())
    }

    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    /// Expand back into a location, restoring the given frequency
    pub fn to_location(&self, frequency: Option<String>) -> FeaturePackLocation {
        FeaturePackLocation::new(
            self.universe.clone(),
            self.producer.clone(),
            self.channel.clone(),
            frequency,
            self.build.clone(),
        )
    }

    pub fn location(&self) -> FeaturePackLocation {
        self.to_location(None)
    }
}

impl fmt::Display for FpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.producer)?;
        if let Some(u) = &self.universe {
            write!(f, "@{}", u)?;
        }
        if let Some(channel) = &self.channel {
            write!(f, ":{}", channel)?;
        }
        if let Some(build) = &self.build {
            write!(f, "#{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for FpId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(FeaturePackLocation::from_str(s)?.fpid())
    }
}

/// A feature-pack location: producer plus an optional channel, frequency and
/// build. A location without a build means "latest on the channel".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeaturePackLocation {
    universe: Option<UniverseSpec>,
    producer: String,
    channel: Option<String>,
    frequency: Option<String>,
    build: Option<String>,
}

impl FeaturePackLocation {
    pub fn new(
        universe: Option<UniverseSpec>,
        producer: impl Into<String>,
        channel: Option<String>,
        frequency: Option<String>,
        build: Option<String>,
    ) -> Self {
        Self {
            universe,
            producer: producer.into(),
            channel,
            frequency,
            build,
        }
    }

    /// A degenerate location carrying raw artifact coordinates
    pub fn from_coordinates(coordinates: impl Into<String>) -> Self {
        Self {
            universe: None,
            producer: coordinates.into(),
            channel: None,
            frequency: None,
            build: None,
        }
    }

    /// Whether this location is in coordinate form and has to be normalized
    /// through resolution before convergence can reason about it
    pub fn is_coordinates(&self) -> bool {
        self.universe.is_none() && self.channel.is_none() && self.producer.contains(':')
    }

    pub fn universe(&self) -> Option<&UniverseSpec> {
        self.universe.as_ref()
    }

    pub fn producer_name(&self) -> &str {
        &self.producer
    }

    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn frequency(&self) -> Option<&str> {
        self.frequency.as_deref()
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    pub fn has_build(&self) -> bool {
        self.build.is_some()
    }

    /// The same location with the build replaced
    pub fn replace_build(&self, build: impl Into<String>) -> Self {
        Self {
            build: Some(build.into()),
            ..self.clone()
        }
    }

    pub fn producer(&self) -> ProducerSpec {
        ProducerSpec::new(self.universe.clone(), self.producer.clone())
    }

    pub fn fpid(&self) -> FpId {
        FpId::new(
            self.universe.clone(),
            self.producer.clone(),
            self.channel.clone(),
            self.build.clone(),
        )
    }
}

impl fmt::Display for FeaturePackLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.producer)?;
        if let Some(u) = &self.universe {
            write!(f, "@{}", u)?;
        }
        if let Some(channel) = &self.channel {
            write!(f, ":{}", channel)?;
        }
        if let Some(frequency) = &self.frequency {
            write!(f, "/{}", frequency)?;
        }
        if let Some(build) = &self.build {
            write!(f, "#{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for FeaturePackLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(syntax(s, "empty location"));
        }

        // Raw artifact coordinates: no universe/channel/build markers and at
        // least two ':' separated segments beyond the first.
        if !s.contains('@')
            && !s.contains('#')
            && !s.contains('/')
            && s.matches(':').count() >= 2
        {
            return Ok(Self::from_coordinates(s));
        }

        let (rest, build) = match s.rfind('#') {
            Some(pos) => {
                let build = &s[pos + 1..];
                if build.is_empty() {
                    return Err(syntax(s, "empty build"));
                }
                (&s[..pos], Some(build.to_string()))
            }
            None => (s, None),
        };

        // The channel separator is the last ':' outside a universe location,
        // which itself may contain ':' and '/' (e.g. maven(file:///repo)).
        let after_universe = rest.rfind(')').map(|p| p + 1).unwrap_or(0);
        let (head, channel_part) = match rest[after_universe..].rfind(':') {
            Some(pos) => {
                let pos = after_universe + pos;
                (&rest[..pos], Some(&rest[pos + 1..]))
            }
            None => (rest, None),
        };

        let (channel, frequency) = match channel_part {
            Some(part) => match part.find('/') {
                Some(pos) => {
                    let frequency = &part[pos + 1..];
                    if frequency.is_empty() {
                        return Err(syntax(s, "empty frequency"));
                    }
                    validate_component(s, frequency, "frequency")?;
                    (Some(&part[..pos]), Some(frequency.to_string()))
                }
                None => (Some(part), None),
            },
            None => (None, None),
        };
        let channel = match channel {
            Some(channel) => {
                validate_component(s, channel, "channel")?;
                Some(channel.to_string())
            }
            None => None,
        };

        let (producer, universe) = match head.find('@') {
            Some(pos) => {
                let universe = UniverseSpec::parse(&head[pos + 1..])?;
                (&head[..pos], Some(universe))
            }
            None => (head, None),
        };
        validate_component(s, producer, "producer")?;

        Ok(Self::new(universe, producer, channel, frequency, build))
    }
}

fn validate_component(input: &str, component: &str, what: &str) -> Result<()> {
    if component.is_empty() {
        return Err(syntax(input, format!("empty {}", what)));
    }
    let valid = |c: char| c.is_alphanumeric() || c == '.' || c == '-' || c == '_';
    if !component.chars().all(valid) {
        return Err(syntax(input, format!("invalid {} '{}'", what, component)));
    }
    Ok(())
}

fn syntax(input: &str, reason: impl Into<String>) -> Error {
    Error::LocationSyntax {
        input: input.to_string(),
        reason: reason.into(),
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

string_serde!(UniverseSpec);
string_serde!(FeaturePackLocation);
string_serde!(FpId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_parse_full() {
        let fpl: FeaturePackLocation = "wildfly@community:current/final#1.0.0".parse().unwrap();
        assert_eq!(fpl.producer_name(), "wildfly");
        assert_eq!(fpl.universe().unwrap().factory(), "community");
        assert_eq!(fpl.channel_name(), Some("current"));
        assert_eq!(fpl.frequency(), Some("final"));
        assert_eq!(fpl.build(), Some("1.0.0"));
        assert!(!fpl.is_coordinates());
    }

    #[test]
    fn test_location_parse_default_universe() {
        let fpl: FeaturePackLocation = "keycloak:10#10.0.2".parse().unwrap();
        assert!(fpl.universe().is_none());
        assert_eq!(fpl.channel_name(), Some("10"));
        assert_eq!(fpl.build(), Some("10.0.2"));
    }

    #[test]
    fn test_location_parse_no_build() {
        let fpl: FeaturePackLocation = "mysite:stable".parse().unwrap();
        assert!(!fpl.has_build());
        assert_eq!(fpl.channel_name(), Some("stable"));
    }

    #[test]
    fn test_location_parse_universe_location() {
        let fpl: FeaturePackLocation = "app@maven(file:///repo):main#2".parse().unwrap();
        let universe = fpl.universe().unwrap();
        assert_eq!(universe.factory(), "maven");
        assert_eq!(universe.location(), Some("file:///repo"));
    }

    #[test]
    fn test_location_display_round_trip() {
        for s in [
            "wildfly@community:current/final#1.0.0",
            "keycloak:10#10.0.2",
            "mysite:stable",
            "app@maven(file:///repo):main#2",
        ] {
            let fpl: FeaturePackLocation = s.parse().unwrap();
            assert_eq!(fpl.to_string(), s);
        }
    }

    #[test]
    fn test_location_parse_errors() {
        assert!("".parse::<FeaturePackLocation>().is_err());
        assert!("prod:".parse::<FeaturePackLocation>().is_err());
        assert!("prod:main#".parse::<FeaturePackLocation>().is_err());
        assert!("prod:ma in".parse::<FeaturePackLocation>().is_err());
        assert!("@u:main".parse::<FeaturePackLocation>().is_err());
        assert!("p@maven(repo:main".parse::<FeaturePackLocation>().is_err());
    }

    #[test]
    fn test_coordinates() {
        let fpl: FeaturePackLocation = "org.example:app-pack:3.1.0".parse().unwrap();
        assert!(fpl.is_coordinates());
        assert_eq!(fpl.to_string(), "org.example:app-pack:3.1.0");
        assert!(FeaturePackLocation::from_coordinates("g:a:1").is_coordinates());
    }

    #[test]
    fn test_fpid_identity_ignores_frequency() {
        let a: FeaturePackLocation = "p:main/final#1".parse().unwrap();
        let b: FeaturePackLocation = "p:main#1".parse().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.fpid(), b.fpid());
    }

    #[test]
    fn test_membership_keyed_by_producer() {
        let a: FeaturePackLocation = "p:main#1".parse().unwrap();
        let b: FeaturePackLocation = "p:other#2".parse().unwrap();
        assert_eq!(a.producer(), b.producer());
    }

    #[test]
    fn test_replace_build() {
        let fpl: FeaturePackLocation = "p:main#1".parse().unwrap();
        assert_eq!(fpl.replace_build("2").build(), Some("2"));
        assert_eq!(fpl.replace_build("2").channel_name(), Some("main"));
    }

    #[test]
    fn test_serde_string_form() {
        let fpl: FeaturePackLocation = "p:main#1".parse().unwrap();
        let json = serde_json::to_string(&fpl).unwrap();
        assert_eq!(json, "\"p:main#1\"");
        let back: FeaturePackLocation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fpl);
    }
}
