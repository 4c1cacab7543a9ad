pub mod personal_accident;
pub mod travel_insurance;

use quote_flow::{FlowRegistry, Result};

/// All flows this service sells, validated at startup.
pub fn build_registry() -> Result<FlowRegistry> {
    let mut registry = FlowRegistry::new();
    registry.register(personal_accident::flow())?;
    registry.register(travel_insurance::flow())?;
    Ok(registry)
}
