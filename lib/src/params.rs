use crate::{optimize::CancelToken, Error, Weights};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

/// The optimizer used to drive a transfer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Algorithm {
    /// Gradient descent with momentum
    Sgd,
    /// Limited memory BFGS
    Lbfgs,
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sgd" => Ok(Self::Sgd),
            "lbfgs" => Ok(Self::Lbfgs),
            other => Err(Error::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sgd => "sgd",
            Self::Lbfgs => "lbfgs",
        })
    }
}

/// Options of a single transfer run.
#[derive(Clone, Debug)]
pub struct RunParams {
    pub algorithm: Algorithm,
    /// Learning rate of `Sgd`
    pub step_size: f64,
    pub iters: usize,
    /// Momentum of `Sgd`, 0 is plain gradient descent
    pub gamma: f64,
    /// Curvature pairs remembered by `Lbfgs`
    pub history_size: usize,
    /// Weight of the content loss in combined runs
    pub alpha: f64,
    /// Weight of the style loss in combined runs
    pub beta: f64,
    /// Where the result and loss plot are written, nothing is written if unset
    pub out_dir: Option<PathBuf>,
    /// Suffix of the output file names
    pub name: String,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

/// A run timeout of `secs` seconds, which must be finite and not negative
pub fn timeout_from_secs(secs: f64) -> Result<Duration, Error> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::InvalidOption("timeout".to_owned(), secs.to_string()));
    }

    Ok(Duration::from_secs_f64(secs))
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Sgd,
            step_size: 10.0,
            iters: 100,
            gamma: 0.0,
            history_size: 7,
            alpha: 1.0,
            beta: 1000.0,
            out_dir: None,
            name: "transfer".to_owned(),
            timeout: None,
            cancel: None,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .parse()
        .map_err(|_e| Error::InvalidOption(key.to_owned(), value.to_owned()))
}

impl RunParams {
    /// Builds parameters from textual key/value pairs, starting from the
    /// defaults. Recognized keys are `type`, `step_size`, `iters`, `gamma`,
    /// `history_size`, `alpha`, `beta`, `out_dir`, `name` and `timeout` (in
    /// seconds). The result is validated.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = Self::default();

        for (key, value) in pairs {
            match key {
                "type" => params.algorithm = value.parse()?,
                "step_size" => params.step_size = parse(key, value)?,
                "iters" => params.iters = parse(key, value)?,
                "gamma" => params.gamma = parse(key, value)?,
                "history_size" => params.history_size = parse(key, value)?,
                "alpha" => params.alpha = parse(key, value)?,
                "beta" => params.beta = parse(key, value)?,
                "out_dir" => params.out_dir = Some(PathBuf::from(value)),
                "name" => params.name = value.to_owned(),
                "timeout" => params.timeout = Some(timeout_from_secs(parse(key, value)?)?),
                other => return Err(Error::UnknownOption(other.to_owned())),
            }
        }

        params.validate()?;
        Ok(params)
    }

    /// Checks that every numeric option is in range
    pub fn validate(&self) -> Result<(), Error> {
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(Error::range("step_size", self.step_size, 0.0, f64::MAX));
        }

        if self.iters == 0 {
            return Err(Error::range("iters", 0.0, 1.0, usize::MAX as f64));
        }

        if !(0.0..1.0).contains(&self.gamma) {
            return Err(Error::range("gamma", self.gamma, 0.0, 1.0));
        }

        if self.history_size == 0 {
            return Err(Error::range("history_size", 0.0, 1.0, usize::MAX as f64));
        }

        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(Error::range("alpha", self.alpha, 0.0, f64::MAX));
        }

        if !self.beta.is_finite() || self.beta < 0.0 {
            return Err(Error::range("beta", self.beta, 0.0, f64::MAX));
        }

        if self.name.is_empty() {
            return Err(Error::InvalidOption("name".to_owned(), String::new()));
        }

        Ok(())
    }

    pub fn weights(&self) -> Weights {
        Weights::new(self.alpha, self.beta)
    }
}
