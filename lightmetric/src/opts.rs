use crate::error::BuildError;
use crate::naming::{check_label_names, check_metric_name, full_name};

/// Options shared by every instrument: identity, help text and label names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Opts {
    namespace: String,
    subsystem: String,
    name: String,
    help: String,
    label_names: Vec<String>,
}

impl Opts {
    /// Creates a new [`Opts`] with the given name and help text, and no labels.
    pub fn new<N, H>(name: N, help: H) -> Opts
    where
        N: Into<String>,
        H: Into<String>,
    {
        Opts { name: name.into(), help: help.into(), ..Default::default() }
    }

    /// Sets the namespace, prepended to the name along with an underscore.
    #[must_use]
    pub fn namespace<S: Into<String>>(mut self, namespace: S) -> Opts {
        self.namespace = namespace.into();
        self
    }

    /// Sets the subsystem, inserted between the namespace and the name along with an underscore.
    #[must_use]
    pub fn subsystem<S: Into<String>>(mut self, subsystem: S) -> Opts {
        self.subsystem = subsystem.into();
        self
    }

    /// Sets the label names.
    ///
    /// Every sample of the instrument carries these labels, in this order.
    #[must_use]
    pub fn label_names<I, S>(mut self, label_names: I) -> Opts
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_names = label_names.into_iter().map(Into::into).collect();
        self
    }

    /// Gets the full name: namespace, subsystem and name joined by underscores.
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.subsystem, &self.name)
    }

    /// Gets the help text.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Validates the options, returning the full name.
    ///
    /// `reserved` lists label names the instrument synthesizes itself.
    pub(crate) fn validate(&self, reserved: &[&str]) -> Result<String, BuildError> {
        if self.name.is_empty() {
            return Err(BuildError::EmptyName);
        }

        let full_name = self.full_name();
        check_metric_name(&full_name)?;
        check_label_names(&self.label_names, reserved)?;

        Ok(full_name)
    }

    pub(crate) fn into_parts(self) -> (String, Vec<String>) {
        (self.help, self.label_names)
    }
}

#[cfg(test)]
mod tests {
    use super::Opts;
    use crate::error::BuildError;

    #[test]
    fn test_full_name() {
        let opts = Opts::new("requests_total", "Requests served.")
            .namespace("app")
            .subsystem("http")
            .label_names(["method", "code"]);

        assert_eq!(opts.full_name(), "app_http_requests_total");
        assert_eq!(opts.help(), "Requests served.");
        assert_eq!(opts.validate(&[]), Ok("app_http_requests_total".to_string()));
    }

    #[test]
    fn test_validation() {
        let unnamed = Opts::new("", "help").namespace("app");
        assert_eq!(unnamed.validate(&[]), Err(BuildError::EmptyName));
        assert_eq!(
            Opts::new("0day", "help").validate(&[]),
            Err(BuildError::InvalidMetricName("0day".to_string()))
        );
        assert_eq!(
            Opts::new("latency", "help").label_names(["quantile"]).validate(&["quantile"]),
            Err(BuildError::ReservedLabelName("quantile".to_string()))
        );
        assert_eq!(
            Opts::new("latency", "help").label_names(["path", "path"]).validate(&[]),
            Err(BuildError::DuplicateLabelName("path".to_string()))
        );
    }
}
