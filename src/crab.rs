pub const CRAB: &str = r"
        _~^~^~_
    \) /  o o  \ (/     proxycrab
      '_   -   _'       routes, certificates and dynamic DNS
      / '-----' \
";
