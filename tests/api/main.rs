// fn main not required
mod delivery;
mod health_check;
mod helpers;
