/// Decide and evolve in one step, without persistence.
///
/// Runs `handle` (pure) and then `apply`s each produced event to the aggregate in place.
/// The dispatcher in `tillerp-infra` is the persisted variant of the same lifecycle.
pub fn execute<A>(
    aggregate: &mut A,
    command: &A::Command,
) -> Result<Vec<A::Event>, A::Error>
where
    A: tillerp_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
