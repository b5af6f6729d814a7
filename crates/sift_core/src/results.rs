use serde::{Deserialize, Serialize};
use std::fmt;

/// One recovered dictionary term with its coefficient in raw-data units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub coefficient: f64,
}

/// One governed equation assembled after training: the time-derivative
/// target expressed in the retained dictionary terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equation {
    pub target: String,
    pub terms: Vec<Term>,
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} =", self.target)?;
        if self.terms.is_empty() {
            return write!(f, " 0");
        }
        for (i, term) in self.terms.iter().enumerate() {
            let magnitude = term.coefficient.abs();
            let sign = if term.coefficient < 0.0 { "-" } else { "+" };
            if i == 0 {
                if term.coefficient < 0.0 {
                    write!(f, " -{magnitude:.4} {}", term.name)?;
                } else {
                    write!(f, " {magnitude:.4} {}", term.name)?;
                }
            } else {
                write!(f, " {sign} {magnitude:.4} {}", term.name)?;
            }
        }
        Ok(())
    }
}
