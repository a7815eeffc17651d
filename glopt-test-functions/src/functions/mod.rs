//! One module per benchmark function.

mod ackley;
mod eggholder;
mod griewank;
mod levy;
mod rastrigin;
mod rosenbrock;
mod schwefel;
mod sphere;
mod zakharov;

pub use ackley::ackley;
pub use eggholder::eggholder;
pub use griewank::griewank;
pub use levy::levy;
pub use rastrigin::rastrigin;
pub use rosenbrock::rosenbrock;
pub use schwefel::schwefel;
pub use sphere::sphere;
pub use zakharov::zakharov;
