//! Access control
//!
//! Allow/deny decision point consulted before commands touch a container.
//! Rules match on object type, object name and command (each may be `*`),
//! optionally restricted to sessions holding a token. The most recently added
//! matching rule wins; without a match the default applies.

/// Token that unlocks administrative objects
pub const ADMIN_TOKEN: &str = "__admin__";

/// Outcome of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Allow,
    Deny,
}

impl Rule {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "allow" => Some(Rule::Allow),
            "deny" => Some(Rule::Deny),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct ObjectRule {
    object_type: String,
    object_name: String,
    command: String,
    token: Option<String>,
    rule: Rule,
}

impl ObjectRule {
    fn matches(&self, object_type: &str, object_name: &str, command: &str, tokens: &[String]) -> bool {
        let field = |pattern: &str, value: &str| pattern == "*" || pattern == value;
        field(&self.object_type, object_type)
            && field(&self.object_name, object_name)
            && field(&self.command, command)
            && self.token.as_ref().map_or(true, |t| tokens.contains(t))
    }
}

/// Rule table
#[derive(Debug, Clone)]
pub struct Auth {
    rules: Vec<ObjectRule>,
    default_rule: Rule,
}

impl Default for Auth {
    fn default() -> Self {
        let mut auth = Self {
            rules: Vec::new(),
            default_rule: Rule::Allow,
        };
        auth.add_rule("*", "__meta__/users", "*", Rule::Deny, None);
        auth.add_rule("*", "__meta__/users", "*", Rule::Allow, Some(ADMIN_TOKEN));
        auth
    }
}

impl Auth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(
        &mut self,
        object_type: &str,
        object_name: &str,
        command: &str,
        rule: Rule,
        token: Option<&str>,
    ) {
        tracing::debug!(
            "Access rule: {:?} {} on {}/{} for {}",
            rule,
            command,
            object_type,
            object_name,
            token.unwrap_or("everyone")
        );
        self.rules.push(ObjectRule {
            object_type: object_type.to_string(),
            object_name: object_name.to_string(),
            command: command.to_string(),
            token: token.map(str::to_string),
            rule,
        });
    }

    pub fn set_default_rule(&mut self, rule: Rule) {
        self.default_rule = rule;
    }

    pub fn check(&self, object_type: &str, object_name: &str, command: &str, tokens: &[String]) -> Rule {
        self.rules
            .iter()
            .rev()
            .find(|r| r.matches(object_type, object_name, command, tokens))
            .map(|r| r.rule)
            .unwrap_or(self.default_rule)
    }
}
