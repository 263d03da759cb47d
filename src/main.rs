fn main() -> anyhow::Result<()> {
  projector_bridge_lib::run()
}
