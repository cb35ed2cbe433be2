// The elevation guard belongs to the thread that acquired it.

use rustjail::kernel::privilege::Elevated;

fn main() {
    let guard = Elevated::acquire().unwrap();
    std::thread::spawn(move || drop(guard));
}
