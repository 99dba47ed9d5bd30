use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SolarDbError};

/// Inverter id stored for the whole-plant aggregate.
pub const WHOLE_PLANT_INVERTER: i64 = -1;

/// A power plant, or one of its inverters.
///
/// The derived ordering sorts by plant first and places the whole-plant
/// aggregate (`inverter_id == None`) before every inverter of that plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlantIdentity {
    pub plant_id: i64,
    pub inverter_id: Option<i64>,
}

impl PlantIdentity {
    pub const fn whole_plant(plant_id: i64) -> Self {
        Self {
            plant_id,
            inverter_id: None,
        }
    }

    pub const fn inverter(plant_id: i64, inverter_id: i64) -> Self {
        Self {
            plant_id,
            inverter_id: Some(inverter_id),
        }
    }

    pub fn is_whole_plant(&self) -> bool {
        self.inverter_id.is_none()
    }

    /// Value written to the `inv_id` column.
    pub fn storage_inverter_id(&self) -> i64 {
        self.inverter_id.unwrap_or(WHOLE_PLANT_INVERTER)
    }

    pub fn from_storage(plant_id: i64, inverter_id: i64) -> Self {
        if inverter_id == WHOLE_PLANT_INVERTER {
            Self::whole_plant(plant_id)
        } else {
            Self::inverter(plant_id, inverter_id)
        }
    }

    fn checked(plant_id: i64, inverter_id: i64, input: impl fmt::Display) -> Result<Self> {
        if inverter_id < 0 && inverter_id != WHOLE_PLANT_INVERTER {
            return Err(SolarDbError::InvalidIdentity {
                input: input.to_string(),
                reason: format!("inverter id {inverter_id} is negative"),
            });
        }
        Ok(Self::from_storage(plant_id, inverter_id))
    }
}

impl fmt::Display for PlantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inverter_id {
            Some(inv) => write!(f, "{}:{}", self.plant_id, inv),
            None => write!(f, "{}", self.plant_id),
        }
    }
}

impl FromStr for PlantIdentity {
    type Err = SolarDbError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let number = |part: &str| {
            part.parse::<i64>().map_err(|_| SolarDbError::InvalidIdentity {
                input: s.to_string(),
                reason: format!("'{part}' is not an integer"),
            })
        };
        match parts.as_slice() {
            [plant] => Ok(Self::whole_plant(number(plant)?)),
            [plant, inverter] => Self::checked(number(plant)?, number(inverter)?, s),
            _ => Err(SolarDbError::InvalidIdentity {
                input: s.to_string(),
                reason: "expected 'pp' or 'pp:inv'".to_string(),
            }),
        }
    }
}

/// Conversion of the accepted identifier shapes into a canonical identity.
pub trait IntoPlantIdentity {
    fn into_identity(self) -> Result<PlantIdentity>;
}

impl IntoPlantIdentity for PlantIdentity {
    fn into_identity(self) -> Result<PlantIdentity> {
        Ok(self)
    }
}

impl IntoPlantIdentity for &PlantIdentity {
    fn into_identity(self) -> Result<PlantIdentity> {
        Ok(*self)
    }
}

impl IntoPlantIdentity for i64 {
    fn into_identity(self) -> Result<PlantIdentity> {
        Ok(PlantIdentity::whole_plant(self))
    }
}

impl IntoPlantIdentity for i32 {
    fn into_identity(self) -> Result<PlantIdentity> {
        Ok(PlantIdentity::whole_plant(i64::from(self)))
    }
}

impl IntoPlantIdentity for u32 {
    fn into_identity(self) -> Result<PlantIdentity> {
        Ok(PlantIdentity::whole_plant(i64::from(self)))
    }
}

impl IntoPlantIdentity for (i64, i64) {
    fn into_identity(self) -> Result<PlantIdentity> {
        PlantIdentity::checked(self.0, self.1, format!("({}, {})", self.0, self.1))
    }
}

impl IntoPlantIdentity for (i64, Option<i64>) {
    fn into_identity(self) -> Result<PlantIdentity> {
        match self.1 {
            Some(inv) => (self.0, inv).into_identity(),
            None => Ok(PlantIdentity::whole_plant(self.0)),
        }
    }
}

impl IntoPlantIdentity for &[i64] {
    fn into_identity(self) -> Result<PlantIdentity> {
        match *self {
            [plant] => Ok(PlantIdentity::whole_plant(plant)),
            [plant, inverter] => (plant, inverter).into_identity(),
            _ => Err(SolarDbError::InvalidIdentity {
                input: format!("{self:?}"),
                reason: format!("expected 1 or 2 components, got {}", self.len()),
            }),
        }
    }
}

impl IntoPlantIdentity for Vec<i64> {
    fn into_identity(self) -> Result<PlantIdentity> {
        self.as_slice().into_identity()
    }
}

impl IntoPlantIdentity for &str {
    fn into_identity(self) -> Result<PlantIdentity> {
        self.parse()
    }
}

impl IntoPlantIdentity for String {
    fn into_identity(self) -> Result<PlantIdentity> {
        self.parse()
    }
}

pub fn resolve(identifier: impl IntoPlantIdentity) -> Result<PlantIdentity> {
    identifier.into_identity()
}

/// Which identities a query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdentityFilter {
    /// Every plant and inverter.
    #[default]
    All,
    /// Every record of one plant, aggregate and inverters alike.
    Plant(i64),
    Exact(PlantIdentity),
}

impl From<PlantIdentity> for IdentityFilter {
    fn from(identity: PlantIdentity) -> Self {
        IdentityFilter::Exact(identity)
    }
}

impl From<Option<PlantIdentity>> for IdentityFilter {
    fn from(identity: Option<PlantIdentity>) -> Self {
        identity.map_or(IdentityFilter::All, IdentityFilter::Exact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_by_plant_then_inverter() {
        let mut ids = vec![
            PlantIdentity::inverter(2, 0),
            PlantIdentity::inverter(1, 3),
            PlantIdentity::whole_plant(2),
            PlantIdentity::inverter(1, 1),
            PlantIdentity::whole_plant(1),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                PlantIdentity::whole_plant(1),
                PlantIdentity::inverter(1, 1),
                PlantIdentity::inverter(1, 3),
                PlantIdentity::whole_plant(2),
                PlantIdentity::inverter(2, 0),
            ]
        );
    }

    #[test]
    fn test_resolve_shapes() {
        assert_eq!(resolve(7i64).unwrap(), PlantIdentity::whole_plant(7));
        assert_eq!(resolve((7i64, -1i64)).unwrap(), PlantIdentity::whole_plant(7));
        assert_eq!(resolve((7i64, 2i64)).unwrap(), PlantIdentity::inverter(7, 2));
        assert_eq!(resolve(vec![7i64]).unwrap(), PlantIdentity::whole_plant(7));
        assert_eq!(resolve("7:2").unwrap(), PlantIdentity::inverter(7, 2));
        let existing = PlantIdentity::inverter(3, 4);
        assert_eq!(resolve(existing).unwrap(), existing);
    }

    #[test]
    fn test_resolve_rejects_malformed() {
        assert!(resolve("seven").is_err());
        assert!(resolve("7:x").is_err());
        assert!(resolve("7:1:2").is_err());
        assert!(resolve(vec![1i64, 2, 3]).is_err());
        assert!(resolve(Vec::<i64>::new()).is_err());
        assert!(resolve((7i64, -5i64)).is_err());
    }

    #[test]
    fn test_display_and_storage_sentinel() {
        let whole = PlantIdentity::whole_plant(12);
        let inv = PlantIdentity::inverter(12, 3);
        assert_eq!(whole.to_string(), "12");
        assert_eq!(inv.to_string(), "12:3");
        assert_eq!(whole.storage_inverter_id(), WHOLE_PLANT_INVERTER);
        assert_eq!(PlantIdentity::from_storage(12, -1), whole);
        assert_ne!(whole, PlantIdentity::inverter(12, 0));
    }
}
