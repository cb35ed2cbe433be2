// A restriction plan runs at most once.

use rustjail::config::StagingLayout;
use rustjail::exec::context::{Caller, FilterSources};
use rustjail::exec::JoinedProcessContext;

fn main() {
    let caller = Caller { uid: 1000, gid: 1000 };
    let filters = FilterSources::staged(&StagingLayout::default(), None);
    let plan = JoinedProcessContext::default().restriction_plan(caller, &filters);
    let _ = plan.apply("rustjail");
    let _ = plan.apply("rustjail");
}
